//! Floodgate server binary.
//!
//! Launches the HTTP front end over the token-bucket limiter service.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 0.0.0.0:8123, info logging
//! floodgate
//!
//! # Environment variables work too; flags win when both are set
//! FLOODGATE_PORT=9000 FLOODGATE_LOG_LEVEL=debug floodgate
//! ```

mod config;
mod routes;
mod shutdown;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::Config;
use floodgate_service::LimiterService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = config.listen_addr()?;
    let service = Arc::new(LimiterService::new(config.engine_config()));

    let app = routes::router(Arc::clone(&service));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "floodgate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await?;

    // The listener is closed; drain the engine before exiting.
    tracing::info!("shutting down rate limiter service");
    service.shutdown().await;
    tracing::info!("shutdown complete");

    Ok(())
}
