use std::time::Duration;

use nerdy_common::config::AppConfig;
use nerdy_common::db;
use nerdy_engine::lock::{RunLock, SCAN_LOCK_KEY};
use nerdy_engine::{PipelineSettings, ScanPipeline};
use nerdy_milestones::MilestoneRegistry;
use nerdy_notifier::WebPushDispatcher;
use nerdy_scheduler::ticker::{ScanTicker, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "nerdy_scheduler=info,nerdy_engine=info,nerdy_notifier=info".into()
            }),
        )
        .json()
        .init();

    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    tracing::info!(once, "Nerdy Birthdays scheduler starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    let vapid = config.require_vapid()?;

    // Connect to database and apply migrations
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let dispatcher = WebPushDispatcher::new(
        vapid,
        Duration::from_secs(config.push_timeout_secs),
        config.push_ttl_secs,
    )?;

    let lock = match &config.redis_url {
        Some(url) => RunLock::redis(url, SCAN_LOCK_KEY, config.scan_interval() * 2).await?,
        None => RunLock::local(),
    };

    let settings = PipelineSettings::from_config(&config)?;
    let pipeline = ScanPipeline::new(pool, MilestoneRegistry::new(), dispatcher, lock, settings);
    let ticker = ScanTicker::new(pipeline, config.scan_interval(), SystemClock);

    if once {
        let report = ticker.run_once().await?;
        tracing::info!(?report, "Single scan finished");
        return Ok(());
    }

    // Run with graceful shutdown on Ctrl+C
    ticker
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await;

    tracing::info!("Nerdy Birthdays scheduler stopped.");
    Ok(())
}
