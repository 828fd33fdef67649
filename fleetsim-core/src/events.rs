//! Fleet activity log.
//!
//! An in-memory ring buffer of notable events (rollout created, device
//! failed, wizard submitted, login). Thread-safe so the HTTP layer can read
//! it while the store writes. Oldest events are dropped at capacity.

use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Maximum number of events to keep in memory
pub const DEFAULT_CAPACITY: usize = 1000;

/// Event severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventLevel::Debug => write!(f, "debug"),
            EventLevel::Info => write!(f, "info"),
            EventLevel::Warning => write!(f, "warning"),
            EventLevel::Error => write!(f, "error"),
        }
    }
}

impl From<&str> for EventLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "debug" => EventLevel::Debug,
            "warning" | "warn" => EventLevel::Warning,
            "error" => EventLevel::Error,
            _ => EventLevel::Info,
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    System,
    Rollout,
    Device,
    Wizard,
    Auth,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::System => write!(f, "system"),
            EventCategory::Rollout => write!(f, "rollout"),
            EventCategory::Device => write!(f, "device"),
            EventCategory::Wizard => write!(f, "wizard"),
            EventCategory::Auth => write!(f, "auth"),
        }
    }
}

impl From<&str> for EventCategory {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "rollout" | "rollouts" => EventCategory::Rollout,
            "device" | "devices" => EventCategory::Device,
            "wizard" => EventCategory::Wizard,
            "auth" | "security" => EventCategory::Auth,
            _ => EventCategory::System,
        }
    }
}

/// A single entry in the activity log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event ID (UUID)
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub category: EventCategory,
    pub message: String,
    /// Optional structured details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Associated resource (device id, rollout id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl Event {
    pub fn new(level: EventLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            category,
            message: message.into(),
            details: None,
            resource_id: None,
        }
    }

    /// Add details to the event
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Add a resource ID to the event
    pub fn with_resource(mut self, resource_id: impl ToString) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    /// Override the timestamp (simulated clock)
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn system(level: EventLevel, message: impl Into<String>) -> Self {
        Self::new(level, EventCategory::System, message)
    }

    pub fn rollout(level: EventLevel, rollout_id: impl ToString, message: impl Into<String>) -> Self {
        Self::new(level, EventCategory::Rollout, message).with_resource(rollout_id)
    }

    pub fn device(level: EventLevel, device_id: &str, message: impl Into<String>) -> Self {
        Self::new(level, EventCategory::Device, message).with_resource(device_id)
    }

    pub fn wizard(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Info, EventCategory::Wizard, message)
    }

    pub fn auth(level: EventLevel, message: impl Into<String>) -> Self {
        Self::new(level, EventCategory::Auth, message)
    }
}

/// Thread-safe activity log with ring buffer
#[derive(Debug)]
pub struct EventLog {
    events: RwLock<VecDeque<Event>>,
    capacity: usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    /// Push a new event, dropping the oldest at capacity
    pub fn push(&self, event: Event) {
        match event.level {
            EventLevel::Debug => debug!(category = %event.category, message = %event.message, "Event"),
            EventLevel::Info => info!(category = %event.category, message = %event.message, "Event"),
            EventLevel::Warning => warn!(category = %event.category, message = %event.message, "Event"),
            EventLevel::Error => error!(category = %event.category, message = %event.message, "Event"),
        }

        if let Ok(mut events) = self.events.write() {
            if events.len() >= self.capacity {
                events.pop_front();
            }
            events.push_back(event);
        }
    }

    /// Events matching the optional filters, newest first
    pub fn query(
        &self,
        level: Option<EventLevel>,
        category: Option<EventCategory>,
        limit: Option<usize>,
    ) -> Vec<Event> {
        self.events
            .read()
            .map(|events| {
                events
                    .iter()
                    .rev()
                    .filter(|e| level.map_or(true, |l| e.level == l))
                    .filter(|e| category.map_or(true, |c| e.category == c))
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All events, newest first
    pub fn all(&self) -> Vec<Event> {
        self.query(None, None, None)
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
