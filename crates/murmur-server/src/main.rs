//! # murmur
//!
//! Realtime presence and messaging hub server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (murmur.toml if present)
//! murmur
//!
//! # Override settings from the environment
//! MURMUR__PORT=8080 MURMUR__HEARTBEAT__TIMEOUT_MS=60000 murmur
//! ```
//!
//! Clients connect to `ws://host:port/chat/ws/{user_id}?token=...`.

mod auth;
mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,murmur_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting murmur server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
