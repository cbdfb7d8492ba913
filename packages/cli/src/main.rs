mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use assets::id::{self, IdGenerator};
use assets::AssetService;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use server::config::AppConfig;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load().context("Failed to load configuration")?;

    match cli.command {
        Commands::Sweep { older_than } => sweep(&config, older_than).await?,
        Commands::NextId { count, decompose } => next_ids(&config, count, decompose)?,
        Commands::Import { url, module, path } => {
            import(&config, &url, module.as_deref(), path.as_deref()).await?
        }
        Commands::RewritePrefix { from, to } => rewrite_prefix(&config, &from, &to).await?,
    }

    Ok(())
}

async fn sweep(config: &AppConfig, older_than: Option<u64>) -> anyhow::Result<()> {
    let max_age = older_than
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.upload.session_max_age());
    let ids = Arc::new(IdGenerator::from_config(&config.ids)?);
    let service = AssetService::open(&config.storage, &config.upload, &config.assets, ids)
        .await
        .context("Failed to open asset storage")?;

    let removed = service
        .assembler()
        .sweep(max_age)
        .await
        .with_context(|| format!("Failed to sweep {}", config.upload.temp_dir.display()))?;

    info!(removed, max_age_secs = max_age.as_secs(), "Sweep finished");
    println!("{removed}");
    Ok(())
}

async fn import(
    config: &AppConfig,
    url: &str,
    module: Option<&str>,
    path: Option<&str>,
) -> anyhow::Result<()> {
    let ids = Arc::new(IdGenerator::from_config(&config.ids)?);
    let service = AssetService::open(&config.storage, &config.upload, &config.assets, ids)
        .await
        .context("Failed to open asset storage")?;

    let target = service.target(module, path, None)?;
    let asset = service
        .ingest_url(url, &target)
        .await
        .with_context(|| format!("Failed to import {url}"))?;

    println!("{}", service.public_url(&asset.key));
    Ok(())
}

fn next_ids(config: &AppConfig, count: u32, decompose: bool) -> anyhow::Result<()> {
    if count == 0 {
        bail!("--count must be at least 1");
    }
    let generator = IdGenerator::from_config(&config.ids).context("Invalid id generator settings")?;

    for _ in 0..count {
        let next = generator.next_id();
        if decompose {
            let (millis, datacenter, worker, sequence) = id::decompose(next);
            println!("{next}\t{millis}\t{datacenter}\t{worker}\t{sequence}");
        } else {
            println!("{next}");
        }
    }
    Ok(())
}

async fn rewrite_prefix(config: &AppConfig, from: &str, to: &str) -> anyhow::Result<()> {
    let Some(database) = &config.database else {
        bail!("No [database] section configured");
    };
    let db = server::database::init_db(database)
        .await
        .context("Failed to connect to database")?;

    let report = server::cascade::rewrite_asset_prefix(&db, from, to)
        .await
        .map_err(|e| anyhow::anyhow!("Prefix rewrite failed: {e:?}"))?;

    println!(
        "users={} articles={} comments={} replies={}",
        report.users, report.articles, report.comments, report.replies
    );
    Ok(())
}
