//! # fleetsim Common
//!
//! Shared utilities for the fleetsim components.
//!
//! ## Logging
//!
//! ```no_run
//! use fleetsim_common::{init_logging, LogFormat};
//!
//! // Initialize with level
//! init_logging("info").unwrap();
//!
//! // Or pick the format from configuration
//! fleetsim_common::logging::init("debug", LogFormat::Json).ok();
//! ```

pub mod logging;

pub use logging::{
    init_logging,
    init_logging_json,
    LogFormat,
};
