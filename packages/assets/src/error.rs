use crate::resolve::ResolveError;
use crate::storage::StorageError;

/// Failures of the upload, merge and delete paths.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Malformed or missing client input.
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// The sniffer did not recognize the bytes.
    #[error("unrecognized file content")]
    UnknownContent,
    /// Recognized, but refused by the accept policy.
    #[error("content type {0} is not accepted")]
    Disallowed(String),
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("{what} exceeds size limit ({actual} > {limit} bytes)")]
    TooLarge {
        what: &'static str,
        actual: u64,
        limit: u64,
    },
    /// The staged chunks could not be assembled into the declared file.
    #[error("merge of session {name} failed: {reason}")]
    Merge { name: String, reason: String },
    /// A remote source could not be downloaded.
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("scratch space IO error: {0}")]
    Scratch(#[from] std::io::Error),
}

impl UploadError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}
