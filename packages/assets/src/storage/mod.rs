mod error;
mod traits;

pub mod filesystem;
#[cfg(feature = "object-storage")]
pub mod s3;

pub use error::{StorageError, classify_status};
pub use filesystem::FilesystemObjectStore;
pub use traits::{BoxReader, Listing, ObjectEntry, ObjectHead, ObjectStore};

use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};

/// Open the configured backend.
pub async fn open_store(
    config: &StorageConfig,
    max_size: u64,
) -> Result<Arc<dyn ObjectStore>, StorageError> {
    match config.backend {
        StorageBackend::Filesystem => {
            let store = FilesystemObjectStore::new(config.root.clone(), max_size).await?;
            tracing::info!(root = %config.root.display(), "Filesystem object store ready");
            Ok(Arc::new(store))
        }
        #[cfg(feature = "object-storage")]
        StorageBackend::S3 => {
            let s3_config = config
                .s3
                .as_ref()
                .ok_or_else(|| StorageError::Unknown("storage.s3 section is missing".into()))?;
            Ok(Arc::new(s3::S3ObjectStore::new(s3_config)?))
        }
        #[cfg(not(feature = "object-storage"))]
        StorageBackend::S3 => Err(StorageError::Unknown(
            "S3 backend requires the object-storage feature".into(),
        )),
    }
}
