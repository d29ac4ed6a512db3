//! Nerdy Birthdays API server binary entrypoint.

use std::net::SocketAddr;

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use nerdy_common::config::{AppConfig, VapidStatus};
use nerdy_common::db::{create_pool, run_migrations};

use nerdy_api::routes::create_router;
use nerdy_api::state::AppState;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("nerdy_api=debug,nerdy_engine=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Nerdy Birthdays API server...");

    // Load configuration
    let config = AppConfig::from_env()?;
    if let VapidStatus::Incomplete = config.vapid() {
        tracing::warn!("Incomplete VAPID configuration, public key will not be served");
    }

    // Create database connection pool
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;

    let port = config.api_port;
    let state = AppState::new(pool, config);

    // Build router
    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
