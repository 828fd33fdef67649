//! Error types for the fleet simulation core.

use thiserror::Error;

use crate::types::RolloutId;
use crate::wizard::ValidationErrors;

/// Errors that can occur while operating on the fleet store.
#[derive(Error, Debug)]
pub enum FleetError {
    /// Reading or writing a persisted blob failed.
    #[error("State storage failed for key '{key}': {source}")]
    Storage {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// A persisted blob could not be decoded.
    #[error("Corrupt snapshot for key '{key}': {source}")]
    CorruptSnapshot {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A persisted blob decoded but violates a registry invariant.
    #[error("Invalid snapshot for key '{key}': {reason}")]
    InvalidSnapshot { key: String, reason: String },

    /// Encoding a blob for persistence failed.
    #[error("Failed to encode key '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Rollout was not found.
    #[error("Rollout not found: {0}")]
    RolloutNotFound(RolloutId),

    /// Device was not found.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Wizard data failed validation.
    #[error("Wizard validation failed: {0}")]
    Validation(ValidationErrors),

    /// Login was rejected.
    #[error("Invalid Administrative Credentials")]
    InvalidCredentials,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;
