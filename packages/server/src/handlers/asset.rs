use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use tracing::instrument;

use crate::error::{AppError, ErrorBody};
use crate::models::asset::{
    DeleteAssetQuery, DirectoryQuery, DirectoryResponse, FileListQuery, FileListResponse,
};
use crate::state::AppState;

#[utoipa::path(
    delete,
    path = "/",
    tag = "Assets",
    operation_id = "deleteAsset",
    summary = "Delete a stored asset",
    description = "Accepts a public URL, a path relative to the asset root or a bare storage key. \
        References outside the asset root are refused.",
    params(DeleteAssetQuery),
    responses(
        (status = 204, description = "Asset deleted"),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 403, description = "Outside the asset root (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Asset not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn delete_asset(
    State(state): State<AppState>,
    Query(query): Query<DeleteAssetQuery>,
) -> Result<StatusCode, AppError> {
    if query.path.trim().is_empty() {
        return Err(AppError::Validation("'path' must not be empty".into()));
    }
    state.assets.delete(&query.path).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/directories",
    tag = "Assets",
    operation_id = "listDirectories",
    summary = "Folder tree of stored assets",
    params(DirectoryQuery),
    responses(
        (status = 200, description = "Recursive folder tree", body = Vec<DirectoryResponse>),
        (status = 400, description = "Invalid prefix (VALIDATION_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn list_directories(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> Result<Json<Vec<DirectoryResponse>>, AppError> {
    let tree = state.assets.directories(query.prefix.as_deref()).await?;
    Ok(Json(tree.into_iter().map(DirectoryResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/files",
    tag = "Assets",
    operation_id = "listFiles",
    summary = "Page through stored files",
    description = "Lists every file below `prefix`, newest first, optionally filtered by a \
        case-insensitive `keyword` on the file name.",
    params(FileListQuery),
    responses(
        (status = 200, description = "One page of files", body = FileListResponse),
        (status = 400, description = "Invalid prefix (VALIDATION_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<FileListQuery>,
) -> Result<Json<FileListResponse>, AppError> {
    let page = state.assets.files(&query.into()).await?;
    Ok(Json(page.into()))
}
