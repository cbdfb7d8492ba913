use assets::config::{AssetConfig, StorageConfig, UploadConfig};
use assets::id::IdConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Environment variable naming the config file (without extension).
pub const CONFIG_PATH_ENV: &str = "ASSETS_CONFIG";

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request body limit for upload routes, in bytes.
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
}

fn default_body_limit() -> usize {
    300 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Recycle pooled connections after this many seconds. Unset keeps them.
    pub max_lifetime_secs: Option<u64>,
    #[serde(default)]
    pub sqlx_logging: bool,
}

fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            max_lifetime_secs: None,
            sqlx_logging: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub assets: AssetConfig,
    #[serde(default)]
    pub ids: IdConfig,
    /// Only needed by the cascade helpers and the admin CLI.
    pub database: Option<DatabaseConfig>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config/config".into());

        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .add_source(File::with_name(&path).required(false))
            // Override from environment (e.g., ASSETS__STORAGE__BACKEND=s3)
            .add_source(Environment::with_prefix("ASSETS").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
