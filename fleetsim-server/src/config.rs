//! Configuration management for the fleetsim daemon.

use std::path::Path;

use anyhow::{Context, Result};
use fleetsim_common::LogFormat;
use fleetsim_core::{AuthAccount, SimulationConfig};
use serde::Deserialize;

use crate::cli::Args;

/// Config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "fleetsim.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Simulation tuning
    pub simulation: SimulationConfig,
    /// Where state is persisted
    pub storage: StorageConfig,
    /// HTTP API configuration
    pub server: ServerConfig,
    /// The administrative account
    pub auth: AuthAccount,
    /// Log output
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        if let Some(format) = args.log_format {
            self.logging.format = format;
        }

        if let Some(ref listen) = args.listen {
            self.server.listen_address = listen.clone();
        }

        if let Some(ref dir) = args.state_dir {
            self.storage.state_dir = dir.clone();
        }

        if let Some(seed) = args.seed {
            self.simulation.seed = Some(seed);
        }

        if args.no_persist {
            self.storage.persist = false;
        }

        self
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.simulation
            .validate()
            .map_err(|e| anyhow::anyhow!("simulation: {}", e))?;
        self.storage
            .validate()
            .map_err(|e| anyhow::anyhow!("storage: {}", e))?;
        self.server
            .validate()
            .map_err(|e| anyhow::anyhow!("server: {}", e))?;
        self.auth
            .validate()
            .map_err(|e| anyhow::anyhow!("auth: {}", e))?;
        Ok(())
    }
}

/// State persistence configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory with one JSON file per persisted key
    pub state_dir: String,
    /// When false, state lives in memory only
    pub persist: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: "./fleetsim-state".to_string(),
            persist: true,
        }
    }
}

impl StorageConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.persist && self.state_dir.trim().is_empty() {
            return Err("state_dir cannot be empty when persistence is enabled".to_string());
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on for the HTTP API
    pub listen_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ServerConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        self.listen_address
            .parse::<std::net::SocketAddr>()
            .map(|_| ())
            .map_err(|e| format!("invalid listen address '{}': {}", self.listen_address, e))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level filter, overridden by `RUST_LOG`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}
