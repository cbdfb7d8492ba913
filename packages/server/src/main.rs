use std::net::SocketAddr;

use anyhow::Context;
use assets::{id, spawn_sweep_task};
use tracing::info;
use tracing_subscriber::EnvFilter;

use server::config::AppConfig;
use server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let ids = id::install(&config.ids).context("Invalid id generator settings")?;
    info!(
        worker_id = ids.worker_id(),
        datacenter_id = ids.datacenter_id(),
        "Id generator ready"
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let sweep_interval = config.upload.sweep_interval();
    let session_max_age = config.upload.session_max_age();

    let state = AppState::open(config, ids)
        .await
        .context("Failed to open asset storage")?;
    spawn_sweep_task(state.assets.assembler(), sweep_interval, session_max_age);

    let app = server::build_router(state);

    info!("Server running at http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
