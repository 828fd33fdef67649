//! # fleetsim daemon
//!
//! Simulates a managed device fleet receiving OS rollouts and exposes it
//! through a JSON API for the dashboard.
//!
//! ## Features
//! - Generated device inventory with search and KPI summary
//! - Four-step update wizard with per-step validation
//! - Background simulation of download/install progress
//! - State persisted across restarts
//!
//! ## Usage
//! ```bash
//! fleetsim --config fleetsim.yaml --log-format json
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cli;
mod config;
mod http_server;
mod server;

use cli::Args;
use config::{Config, DEFAULT_CONFIG_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration: an explicit path must exist, the default may not
    let (config, source) = match &args.config {
        Some(path) => (Config::load(path)?, Some(path.clone())),
        None => match Config::load(DEFAULT_CONFIG_PATH) {
            Ok(cfg) => (cfg, Some(DEFAULT_CONFIG_PATH.to_string())),
            Err(_) => (Config::default(), None),
        },
    };
    let config = config.with_cli_overrides(&args);

    // Initialize logging
    fleetsim_common::logging::init(&config.logging.level, config.logging.format)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting fleetsim daemon");
    match &source {
        Some(path) => info!(config_path = %path, "Configuration loaded"),
        None => info!("No config file found, using CLI arguments and defaults"),
    }

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e);
    }

    info!(
        listen = %config.server.listen_address,
        tick_interval = %config.simulation.tick_interval,
        fleet_size = config.simulation.fleet_size,
        persist = config.storage.persist,
        "Daemon configured"
    );

    if let Err(e) = server::run(config).await {
        error!(error = %e, "Server failed");
        return Err(e);
    }

    Ok(())
}
