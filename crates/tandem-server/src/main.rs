//! # Tandem Server
//!
//! Group-scoped 1:1 matchmaking and messaging relay.
//!
//! Clients connect to `ws://<host>:<port>/ws?group=<name>`, wait for a
//! `partner_found` event and then exchange `send_message` / `new_message`
//! events with their partner.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! tandem
//!
//! # Run with a config file in the working directory
//! cp tandem.example.toml tandem.toml && tandem
//!
//! # Run with environment variables
//! TANDEM__PORT=8080 TANDEM__HOST=0.0.0.0 tandem
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem_server=debug,tandem_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Tandem server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
