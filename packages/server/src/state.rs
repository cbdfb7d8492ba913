use std::sync::Arc;

use assets::{AssetLifecycle, AssetService, IdGenerator, UploadError};

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub assets: Arc<AssetService>,
    pub lifecycle: AssetLifecycle,
}

impl AppState {
    /// Open the configured stores and wire the asset services together.
    pub async fn open(config: AppConfig, ids: Arc<IdGenerator>) -> Result<Self, UploadError> {
        let service =
            AssetService::open(&config.storage, &config.upload, &config.assets, ids).await?;
        Ok(Self::with_service(config, service))
    }

    pub fn with_service(config: AppConfig, service: AssetService) -> Self {
        let lifecycle = AssetLifecycle::new(
            service.store(),
            service.locator().clone(),
            &config.assets.protected,
        );
        Self {
            config,
            assets: Arc::new(service),
            lifecycle,
        }
    }
}
