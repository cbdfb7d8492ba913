use std::path::{Path, PathBuf};

use assets::ChunkMeta;
use axum::Json;
use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, ErrorBody};
use crate::models::upload::{ChunkResponse, UploadResponse};
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/",
    tag = "Uploads",
    operation_id = "uploadFiles",
    summary = "Upload one or more files",
    description = "Stores every `file` field under a key derived from its sniffed content. \
        Optional fields: `module` (owning module name or legacy code), `path` (explicit \
        directory, takes precedence over `module`), `accept` (comma-separated media kinds or \
        MIME types) and `replace` (semicolon-separated URLs released once the upload succeeds). \
        File names and declared content types are ignored.",
    request_body(content_type = "multipart/form-data", description = "Files with optional routing fields"),
    responses(
        (status = 201, description = "Files stored", body = UploadResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 413, description = "File too large (PAYLOAD_TOO_LARGE)", body = ErrorBody),
        (status = 415, description = "Unknown or refused content (UNSUPPORTED_MEDIA)", body = ErrorBody),
        (status = 503, description = "Storage unavailable (SERVICE_DEGRADED)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, multipart))]
pub async fn upload_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut spool = SpoolDir::create(&state.config.upload.temp_dir).await?;
    let urls = store_spooled(&state, &mut multipart, &mut spool).await?;
    Ok((StatusCode::CREATED, Json(UploadResponse { urls })))
}

/// Per-request directory for spooled multipart files, created under the
/// upload scratch root. Removed when dropped, including when the request
/// future is cancelled by a client disconnect.
struct SpoolDir {
    path: PathBuf,
    files: Vec<PathBuf>,
}

impl SpoolDir {
    async fn create(root: &Path) -> Result<Self, AppError> {
        let path = root.join(format!("upload-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create spool directory: {e}")))?;
        Ok(Self {
            path,
            files: Vec::new(),
        })
    }

    fn next_file(&mut self) -> PathBuf {
        let file = self.path.join(self.files.len().to_string());
        self.files.push(file.clone());
        file
    }
}

impl Drop for SpoolDir {
    fn drop(&mut self) {
        let path = std::mem::take(&mut self.path);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            let _ = std::fs::remove_dir_all(&path);
            return;
        };
        handle.spawn(async move {
            if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove spool directory");
            }
        });
    }
}

async fn store_spooled(
    state: &AppState,
    multipart: &mut Multipart,
    spool: &mut SpoolDir,
) -> Result<Vec<String>, AppError> {
    let max_size = state.config.upload.max_file_size;
    let mut module = None;
    let mut path = None;
    let mut accept = None;
    let mut replace = None;

    while let Some(field) = next_field(multipart).await? {
        match field.name() {
            Some("file") => {
                let temp_path = spool.next_file();
                spool_field(field, &temp_path, max_size).await?;
            }
            Some("module") => module = Some(field_text(field, "module").await?),
            Some("path") => path = Some(field_text(field, "path").await?),
            Some("accept") => accept = Some(field_text(field, "accept").await?),
            Some("replace") => replace = Some(field_text(field, "replace").await?),
            _ => {} // Ignore unknown fields.
        }
    }

    if spool.files.is_empty() {
        return Err(AppError::Validation("Missing 'file' field".into()));
    }

    let target = state
        .assets
        .target(module.as_deref(), path.as_deref(), accept.as_deref())?;

    let mut keys = Vec::with_capacity(spool.files.len());
    for temp_path in &spool.files {
        match state.assets.ingest_file(temp_path, &target).await {
            Ok(asset) => keys.push(asset.key),
            Err(e) => {
                if !keys.is_empty() {
                    warn!(stored = keys.len(), "Upload failed midway, releasing stored files");
                    drop(state.lifecycle.spawn_release(keys));
                }
                return Err(e.into());
            }
        }
    }

    if let Some(replace) = replace {
        let previous: Vec<String> = replace
            .split(';')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .filter_map(|r| state.lifecycle.replaced(Some(r), None))
            .filter(|k| !keys.contains(k))
            .collect();
        if !previous.is_empty() {
            info!(count = previous.len(), "Releasing replaced assets");
            drop(state.lifecycle.spawn_release(previous));
        }
    }

    Ok(keys.iter().map(|k| state.assets.public_url(k)).collect())
}

#[utoipa::path(
    post,
    path = "/chunks",
    tag = "Uploads",
    operation_id = "uploadChunk",
    summary = "Upload one chunk of a large file",
    description = "Stages chunk `chunk` of `chunks` for session `name` after checking its MD5 \
        `hash`. When the last missing chunk arrives the chunks are merged in index order, the \
        optional whole-file `file_hash` is verified and the result is stored like a direct \
        upload. Resending an identical chunk is a no-op.",
    request_body(content_type = "multipart/form-data", description = "Chunk bytes with session metadata"),
    responses(
        (status = 200, description = "Chunk staged (status progress or duplicate)", body = ChunkResponse),
        (status = 201, description = "All chunks received and merged (status complete)", body = ChunkResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 413, description = "Chunk or file too large (PAYLOAD_TOO_LARGE)", body = ErrorBody),
        (status = 415, description = "Unknown or refused content (UNSUPPORTED_MEDIA)", body = ErrorBody),
        (status = 422, description = "Hash mismatch (CHECKSUM_MISMATCH)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, multipart))]
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let max_chunk_size = state.config.upload.max_chunk_size;
    let mut name = None;
    let mut index = None;
    let mut total = None;
    let mut hash = None;
    let mut file_hash = None;
    let mut module = None;
    let mut path = None;
    let mut accept = None;
    let mut data: Option<Vec<u8>> = None;

    while let Some(field) = next_field(&mut multipart).await? {
        match field.name() {
            Some("file") => data = Some(read_field(field, max_chunk_size).await?),
            Some("name") => name = Some(field_text(field, "name").await?),
            Some("chunk") => index = Some(field_text(field, "chunk").await?),
            Some("chunks") => total = Some(field_text(field, "chunks").await?),
            Some("hash") => hash = Some(field_text(field, "hash").await?),
            Some("file_hash") => file_hash = Some(field_text(field, "file_hash").await?),
            Some("module") => module = Some(field_text(field, "module").await?),
            Some("path") => path = Some(field_text(field, "path").await?),
            Some("accept") => accept = Some(field_text(field, "accept").await?),
            _ => {}
        }
    }

    let data = data.ok_or_else(|| AppError::Validation("Missing 'file' field".into()))?;
    let meta = ChunkMeta::parse(
        name.as_deref(),
        index.as_deref(),
        total.as_deref(),
        hash.as_deref(),
        file_hash.as_deref(),
    )?;
    let target = state
        .assets
        .target(module.as_deref(), path.as_deref(), accept.as_deref())?;

    let outcome = state.assets.accept_chunk(&meta, &data, &target).await?;
    let response = ChunkResponse::from_outcome(outcome, |key| state.assets.public_url(key));
    let status = if response.is_complete() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response)))
}

async fn next_field<'a>(multipart: &'a mut Multipart) -> Result<Option<Field<'a>>, AppError> {
    multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))
}

async fn field_text(field: Field<'_>, name: &str) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read {name}: {e}")))
}

fn too_large(what: &str, limit: u64) -> AppError {
    AppError::PayloadTooLarge(format!("{what} exceeds maximum size of {limit} bytes"))
}

/// Read a small multipart field into memory, refusing anything over `max_size`.
async fn read_field(mut field: Field<'_>, max_size: u64) -> Result<Vec<u8>, AppError> {
    let mut data = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::Validation(format!("Upload read error: {e}")))?
    {
        if (data.len() + chunk.len()) as u64 > max_size {
            return Err(too_large("Chunk", max_size));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

/// Stream a multipart field to a temp file.
async fn spool_field(mut field: Field<'_>, temp_path: &Path, max_size: u64) -> Result<u64, AppError> {
    let mut temp_file = tokio::fs::File::create(temp_path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create temp file: {e}")))?;

    let mut total_size: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::Validation(format!("Upload read error: {e}")))?
    {
        total_size += chunk.len() as u64;
        if total_size > max_size {
            return Err(too_large("File", max_size));
        }
        temp_file
            .write_all(&chunk)
            .await
            .map_err(|e| AppError::Internal(format!("Temp file write failed: {e}")))?;
    }

    temp_file
        .flush()
        .await
        .map_err(|e| AppError::Internal(format!("Temp file flush failed: {e}")))?;
    Ok(total_size)
}
