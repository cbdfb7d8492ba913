use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;
use tracing::instrument;

use crate::error::AppError;
use crate::state::AppState;

/// Stream a stored asset back under its public URL.
#[instrument(skip(state, headers))]
pub async fn serve_asset(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let key = state.assets.locator().normalize(&key)?;
    let store = state.assets.store();
    let head = store.head(&key).await?;

    let etag_value = head.etag.as_deref().map(|tag| format!("\"{tag}\""));
    if let Some(etag) = &etag_value
        && let Some(if_none_match) = headers.get(header::IF_NONE_MATCH)
        && let Ok(val) = if_none_match.to_str()
        && (val == etag || val == "*")
    {
        return Ok(StatusCode::NOT_MODIFIED.into_response());
    }

    let reader = store.get_stream(&key).await?;
    let body = Body::from_stream(ReaderStream::new(reader));

    let content_type = head
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, head.size.to_string())
        .header(header::CACHE_CONTROL, "public, max-age=86400");
    if let Some(etag) = &etag_value {
        builder = builder.header(header::ETAG, etag);
    }

    builder
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}
