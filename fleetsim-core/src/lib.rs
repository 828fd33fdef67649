//! # fleetsim core
//!
//! Device registry and OS rollout simulation for the fleet dashboard.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  submit   ┌──────────────────────────────────┐
//! │  WizardSession   │ ────────► │            FleetStore            │
//! │ (validate steps) │           │  devices ─┬─ rollouts ─ active   │
//! └──────────────────┘           └───────────┼──────────────────────┘
//!                                            │ tick (write lock)
//!                                ┌───────────┴──────────┐
//!                                │   SimulationTicker   │
//!                                │ advance → aggregate  │
//!                                │       → settle       │
//!                                └──────────────────────┘
//! ```
//!
//! Rollout counts are always recomputed from the device registry; the
//! registry is the single source of truth.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fleetsim_core::{EventLog, FleetStore, MemoryBackend, SimulationConfig, random};
//!
//! let store = FleetStore::initialize(
//!     SimulationConfig::default(),
//!     Arc::new(MemoryBackend::new()),
//!     Arc::new(EventLog::new()),
//!     random::from_seed(Some(42)),
//!     chrono::Utc::now(),
//! );
//! assert_eq!(store.devices().len(), 1250);
//! ```

pub mod auth;
pub mod error;
pub mod events;
pub mod generator;
pub mod inventory;
pub mod persistence;
pub mod random;
pub mod rollout;
pub mod simulation;
pub mod store;
pub mod ticker;
pub mod types;
pub mod version;
pub mod wizard;

#[cfg(test)]
mod testing;

pub use auth::{AuthAccount, AuthGate, UserSession};
pub use error::{FleetError, Result};
pub use events::{Event, EventCategory, EventLevel, EventLog};
pub use inventory::{DevicePage, DeviceQuery, FleetSummary};
pub use persistence::{FileBackend, MemoryBackend, StateBackend};
pub use random::RandomSource;
pub use rollout::RolloutPlan;
pub use simulation::SimulationConfig;
pub use store::{FleetStore, TickReport};
pub use ticker::{SharedStore, SimulationTicker, TickerHandle};
pub use types::*;
pub use wizard::{
    Navigation, ReviewSummary, ValidationErrors, WizardData, WizardSession, WizardStep,
};
