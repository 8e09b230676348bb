/// bans-engine - standalone punishment engine daemon
///
/// Boots the engine against the configured database, keeps the expiration
/// sweep and health check running, and shuts down cleanly on Ctrl-C.
use anyhow::Context;
use bans_engine::{config::BansConfig, context::BansContext, jobs::JobScheduler, HeadlessPlatform};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = BansConfig::from_env().context("failed to load configuration")?;

    // Initialize logging
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("bans_engine=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        dialect = %config.storage.dialect,
        async_loading = config.storage.async_loading,
        "Starting punishment engine"
    );

    // Create engine context
    let ctx = BansContext::new(config, Arc::new(HeadlessPlatform))
        .await
        .context("failed to start punishment engine")?;
    let ctx = Arc::new(ctx);

    // Start background jobs
    let scheduler = Arc::new(JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    scheduler.shutdown();
    ctx.close().await;

    Ok(())
}
