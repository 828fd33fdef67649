//! Command-line argument parsing.

use clap::Parser;
use fleetsim_common::LogFormat;

/// fleetsim - device fleet and OS rollout simulator
#[derive(Parser, Debug)]
#[command(name = "fleetsim")]
#[command(about = "fleetsim - device fleet and OS rollout simulator")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long, env = "FLEETSIM_CONFIG")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Log output format (text, json)
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    /// Listen address for the HTTP API
    #[arg(long)]
    pub listen: Option<String>,

    /// Directory holding the persisted state
    #[arg(long)]
    pub state_dir: Option<String>,

    /// Seed for reproducible simulations
    #[arg(long)]
    pub seed: Option<u64>,

    /// Keep all state in memory
    #[arg(long)]
    pub no_persist: bool,
}
