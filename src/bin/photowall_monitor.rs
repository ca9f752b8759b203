use anyhow::{Context, Result};
use clap::Parser;
use photowall_sync::shared::logging;
use photowall_sync::{
    AppConfig, ConnectionPool, SessionScope, SqliteBackend, SyncBackend, SyncCoordinator,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "photowall-monitor")]
#[command(about = "Follow a photo wall session and log every store change", long_about = None)]
struct Cli {
    /// Event id to follow
    #[arg(short, long, env = "PHOTOWALL_EVENT_ID")]
    scope: String,

    /// SQLite database URL (overrides PHOTOWALL_DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.json_logs);

    info!("Starting photowall-monitor v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::from_env();
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    let scope = SessionScope::new(cli.scope).map_err(anyhow::Error::msg)?;

    let pool = ConnectionPool::from_config(&config.database)
        .await
        .with_context(|| format!("failed to open {}", config.database.url))?;
    pool.migrate().await.context("failed to run migrations")?;

    let backend = Arc::new(SqliteBackend::new(pool.clone()));
    let coordinator = SyncCoordinator::new(SyncBackend::from_shared(backend), config.sync);
    coordinator.activate(scope.clone()).await?;

    let mut revisions = coordinator.subscribe_changes();
    info!(scope = %scope, "Monitoring session. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    warn!("Store revision channel closed");
                    break;
                }
                let revision = *revisions.borrow_and_update();
                let snapshot = coordinator.snapshot().await;
                let likes: i64 = snapshot.iter().map(|photo| photo.likes_count).sum();
                info!(
                    revision,
                    photos = snapshot.len(),
                    likes,
                    newest = snapshot.first().map(|photo| photo.id.as_str()),
                    "Store changed"
                );
            }
        }
    }

    info!("Shutting down...");
    coordinator.deactivate().await;
    info!(metrics = ?coordinator.metrics(), "Session closed");
    pool.close().await;

    Ok(())
}
