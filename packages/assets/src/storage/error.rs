/// Errors that can occur during object storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(String),
    /// Network failure, timeout or throttling. The caller may retry.
    #[error("transient storage failure: {0}")]
    Transient(String),
    /// Credentials rejected or quota exhausted.
    #[error("storage permission or quota failure: {0}")]
    Permission(String),
    #[error("storage failure: {0}")]
    Unknown(String),
    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The object exceeds the configured size limit.
    #[error("object exceeds size limit ({actual} > {limit} bytes)")]
    SizeLimitExceeded { actual: u64, limit: u64 },
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

/// Classify an HTTP status returned by a remote object store.
pub fn classify_status(status: u16, detail: impl Into<String>) -> StorageError {
    let detail = detail.into();
    match status {
        404 => StorageError::NotFound(detail),
        401 | 403 | 507 => StorageError::Permission(format!("HTTP {status}: {detail}")),
        408 | 429 | 500..=599 => StorageError::Transient(format!("HTTP {status}: {detail}")),
        _ => StorageError::Unknown(format!("HTTP {status}: {detail}")),
    }
}
