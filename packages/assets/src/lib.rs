//! Content-addressed asset ingestion and lifecycle.
//!
//! Uploads are classified by their bytes, stored under a key derived from
//! the sniffed type and a snowflake id, and released again when the entity
//! that embedded them is edited or deleted.

pub mod chunk;
pub mod config;
pub mod digest;
pub mod error;
pub mod id;
pub mod ingest;
pub mod lifecycle;
pub mod resolve;
pub mod scratch;
pub mod service;
pub mod sniff;
pub mod storage;

pub use chunk::{ChunkAssembler, ChunkMeta, ChunkOutcome, spawn_sweep_task};
pub use error::UploadError;
pub use id::IdGenerator;
pub use ingest::{StoredAsset, Target};
pub use lifecycle::{AssetLifecycle, EntityNode, ReleaseReport};
pub use resolve::AssetLocator;
pub use service::AssetService;
pub use storage::{ObjectStore, StorageError};
