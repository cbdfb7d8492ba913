pub mod cascade;
pub mod config;
pub mod database;
pub mod entity;
pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod state;

use axum::routing::get;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_scalar::{Scalar, Servable as ScalarServable};
use utoipa_swagger_ui::SwaggerUi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Asset Service API",
        version = "1.0.0",
        description = "Content-addressed uploads, chunked uploads and stored asset management"
    ),
    tags(
        (name = "Uploads", description = "Direct and chunked uploads"),
        (name = "Assets", description = "Deleting and browsing stored assets"),
    ),
)]
struct ApiDoc;

/// Build the application router.
pub fn build_router(state: AppState) -> axum::Router {
    let (mut router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest("/api", routes::api_routes(&state.config))
        .split_for_parts();

    let root = state.config.assets.root.trim_matches('/');
    if !root.is_empty() {
        router = router.route(
            &format!("/{root}/{{*key}}"),
            get(handlers::serve::serve_asset),
        );
    }

    router
        .with_state(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api.clone()))
        .merge(Scalar::with_url("/scalar", api))
}
