//! # Beacon
//!
//! Connects to a broadcasting server, joins the configured channels and logs
//! every event it receives.
//!
//! ## Usage
//!
//! ```bash
//! # Run with a config file from a default location
//! beacon
//!
//! # Run with a specific config file
//! beacon /path/to/beacon.toml
//!
//! # Override settings from the environment
//! BEACON_CONNECTION__HOST=wss://ws.example.com beacon
//! ```

mod config;
mod listener;
mod metrics;

use anyhow::{Context, Result};
use beacon_core::Connector;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=debug,beacon_core=debug,beacon_transport=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let path = std::env::args().nth(1);
    let config = config::Config::load(path.as_deref())?;

    info!(
        host = config.connection.host.as_deref().unwrap_or_default(),
        channels = config.subscriptions.len(),
        "Starting Beacon"
    );

    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let connector = Connector::new(config.connection.clone());
    connector.connect().context("Failed to start connection")?;
    listener::watch(&connector, &config)?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    connector.disconnect();
    Ok(())
}
