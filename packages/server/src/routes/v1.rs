use axum::extract::DefaultBodyLimit;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::config::AppConfig;
use crate::handlers;
use crate::state::AppState;

pub fn routes(config: &AppConfig) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .nest("/uploads", upload_routes(config))
        .nest("/assets", asset_routes())
}

fn upload_routes(config: &AppConfig) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::upload::upload_files))
        .routes(routes!(handlers::upload::upload_chunk))
        .layer(DefaultBodyLimit::max(config.server.body_limit))
}

fn asset_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::asset::delete_asset))
        .routes(routes!(handlers::asset::list_directories))
        .routes(routes!(handlers::asset::list_files))
}
