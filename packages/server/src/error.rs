use assets::UploadError;
use assets::resolve::ResolveError;
use assets::storage::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::DbErr;
use serde::Serialize;

/// Structured error response returned by all endpoints on failure.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code. One of: `VALIDATION_ERROR`,
    /// `UNSUPPORTED_MEDIA`, `CHECKSUM_MISMATCH`, `PAYLOAD_TOO_LARGE`,
    /// `PERMISSION_DENIED`, `NOT_FOUND`, `SERVICE_DEGRADED`, `INTERNAL_ERROR`.
    #[schema(example = "VALIDATION_ERROR")]
    pub code: &'static str,
    /// Human-readable error description.
    #[schema(example = "Missing 'file' field")]
    pub message: String,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    UnsupportedMedia(String),
    ChecksumMismatch(String),
    PayloadTooLarge(String),
    PermissionDenied(String),
    NotFound(String),
    /// The object store is unreachable or throttling.
    Degraded(String),
    Internal(String),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        let (status, code, message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
            AppError::UnsupportedMedia(msg) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_MEDIA", msg)
            }
            AppError::ChecksumMismatch(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "CHECKSUM_MISMATCH", msg)
            }
            AppError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg)
            }
            AppError::PermissionDenied(msg) => (StatusCode::FORBIDDEN, "PERMISSION_DENIED", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::Degraded(detail) => {
                tracing::warn!("Object store degraded: {}", detail);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_DEGRADED",
                    "Storage is temporarily unavailable, try again later".into(),
                )
            }
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An unexpected error occurred".into(),
                )
            }
        };
        (status, ErrorBody { code, message })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("Asset '{key}' not found")),
            StorageError::SizeLimitExceeded { .. } => AppError::PayloadTooLarge(err.to_string()),
            StorageError::Permission(_) => AppError::Internal(err.to_string()),
            ref e if e.is_transient() => AppError::Degraded(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::ForeignUrl(_) | ResolveError::OutsideRoot(_) => {
                AppError::PermissionDenied(err.to_string())
            }
            other => AppError::Validation(other.to_string()),
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Invalid(msg) => AppError::Validation(msg),
            UploadError::Resolve(e) => e.into(),
            UploadError::UnknownContent | UploadError::Disallowed(_) => {
                AppError::UnsupportedMedia(err.to_string())
            }
            UploadError::ChecksumMismatch { .. } => AppError::ChecksumMismatch(err.to_string()),
            UploadError::TooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            UploadError::Fetch { .. } => AppError::Validation(err.to_string()),
            UploadError::Storage(e) => e.into(),
            UploadError::Merge { .. } | UploadError::Scratch(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}
