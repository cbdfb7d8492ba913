use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Chunked and direct upload limits.
#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    /// Scratch directory for chunk sessions. Default: "./tmp/chunks".
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Largest accepted file, direct or merged. Default: 256 MiB.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Largest accepted single chunk. Default: 16 MiB.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Upper bound on the declared chunk count. Default: 4096.
    #[serde(default = "default_max_chunks")]
    pub max_chunks: u32,
    /// Orphan sweep period in seconds. Default: 3600.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Sessions untouched for longer than this are evicted. Default: 43200 (12 h).
    #[serde(default = "default_session_max_age_secs")]
    pub session_max_age_secs: u64,
    /// Sniffed extensions refused even when their media kind is accepted.
    #[serde(default = "default_blocked_extensions")]
    pub blocked_extensions: Vec<String>,
    /// Timeout for importing a remote URL, in seconds. Default: 15.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./tmp/chunks")
}
fn default_max_file_size() -> u64 {
    256 * 1024 * 1024
}
fn default_max_chunk_size() -> u64 {
    16 * 1024 * 1024
}
fn default_max_chunks() -> u32 {
    4096
}
fn default_sweep_interval_secs() -> u64 {
    3600
}
fn default_session_max_age_secs() -> u64 {
    12 * 3600
}
fn default_blocked_extensions() -> Vec<String> {
    ["exe", "elf", "macho"].map(String::from).to_vec()
}
fn default_fetch_timeout_secs() -> u64 {
    15
}

impl UploadConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_max_age_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            max_file_size: default_max_file_size(),
            max_chunk_size: default_max_chunk_size(),
            max_chunks: default_max_chunks(),
            sweep_interval_secs: default_sweep_interval_secs(),
            session_max_age_secs: default_session_max_age_secs(),
            blocked_extensions: default_blocked_extensions(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Filesystem,
    S3,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Filesystem backend root. Default: "./public/upload".
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    pub s3: Option<S3Config>,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./public/upload")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            root: default_storage_root(),
            s3: None,
        }
    }
}

/// Any S3-compatible endpoint (AWS, MinIO, Aliyun OSS, R2, ...).
#[derive(Debug, Deserialize, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Address the bucket as `{endpoint}/{bucket}`. Default: true.
    #[serde(default = "default_path_style")]
    pub path_style: bool,
}

fn default_s3_region() -> String {
    "us-east-1".into()
}
fn default_path_style() -> bool {
    true
}

/// Public addressing of stored assets.
#[derive(Debug, Deserialize, Clone)]
pub struct AssetConfig {
    /// Prepended to every key in returned URLs. Default: "/upload".
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,
    /// Root segment clients may include in relative paths. Default: "upload".
    #[serde(default = "default_asset_root")]
    pub root: String,
    /// Keys the lifecycle manager never deletes. Default: ["image/avatar.png"].
    #[serde(default = "default_protected")]
    pub protected: Vec<String>,
}

fn default_public_prefix() -> String {
    "/upload".into()
}
fn default_asset_root() -> String {
    "upload".into()
}
fn default_protected() -> Vec<String> {
    vec!["image/avatar.png".into()]
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            public_prefix: default_public_prefix(),
            root: default_asset_root(),
            protected: default_protected(),
        }
    }
}
