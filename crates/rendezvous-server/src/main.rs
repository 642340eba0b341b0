//! # Rendezvous Server
//!
//! Chat-room rendezvous and relay.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! rendezvous
//!
//! # Run with custom config
//! rendezvous --config /path/to/rendezvous.toml
//!
//! # Run with environment variables
//! RENDEZVOUS_CONTROL_PORT=7000 RENDEZVOUS_DATA_PORT=7001 rendezvous
//! ```

use anyhow::Result;
use clap::Parser;
use rendezvous_server::{metrics, Config, Server};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Chat-room rendezvous and relay server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "rendezvous=debug,rendezvous_server=debug,rendezvous_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    tracing::info!(
        "Starting Rendezvous server on {} (control :{}, data :{})",
        config.host,
        config.control_port,
        config.data_port
    );

    // Initialize metrics
    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            tracing::error!("Failed to start metrics server: {}", e);
        }
    }

    // Start the server
    Server::bind(config).await?.run().await?;

    tracing::info!("Rendezvous server stopped");
    Ok(())
}
