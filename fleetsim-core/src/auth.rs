//! Single-account login gate with a persisted session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FleetError, Result};
use crate::events::{Event, EventLevel, EventLog};
use crate::persistence::{self, keys, StateBackend};

/// The one administrative account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthAccount {
    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_password")]
    pub password: String,

    /// Name shown once logged in
    #[serde(default = "default_display_name")]
    pub display_name: String,

    #[serde(default = "default_role")]
    pub role: String,
}

fn default_username() -> String {
    "Admin".to_string()
}

fn default_password() -> String {
    "Admin123".to_string()
}

fn default_display_name() -> String {
    "System Architect".to_string()
}

fn default_role() -> String {
    "L0 - PRIVILEGED".to_string()
}

impl Default for AuthAccount {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: default_password(),
            display_name: default_display_name(),
            role: default_role(),
        }
    }
}

impl AuthAccount {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.username.trim().is_empty() {
            return Err("auth username cannot be empty".to_string());
        }
        if self.password.trim().is_empty() {
            return Err("auth password cannot be empty".to_string());
        }
        Ok(())
    }
}

/// A logged-in operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    pub name: String,
    pub username: String,
    pub role: String,
    pub login_time: DateTime<Utc>,
}

/// Login gate for mutating operations.
pub struct AuthGate {
    account: AuthAccount,
    session: Option<UserSession>,
    backend: Arc<dyn StateBackend>,
    events: Arc<EventLog>,
}

impl AuthGate {
    /// Create the gate, resuming a persisted session if one is readable.
    pub fn new(account: AuthAccount, backend: Arc<dyn StateBackend>, events: Arc<EventLog>) -> Self {
        let session = match persistence::load_json::<Option<UserSession>>(backend.as_ref(), keys::SESSION) {
            Ok(session) => session.flatten(),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable session");
                events.push(Event::auth(EventLevel::Warning, "Stored session was unreadable and has been discarded"));
                if let Err(e) = backend.remove(keys::SESSION) {
                    warn!(error = %e, "Failed to remove unreadable session");
                }
                None
            }
        };

        if let Some(s) = &session {
            info!(username = %s.username, "Resumed persisted session");
        }

        Self {
            account,
            session,
            backend,
            events,
        }
    }

    /// Check credentials (both trimmed) and open a session.
    pub fn login(&mut self, username: &str, password: &str, now: DateTime<Utc>) -> Result<UserSession> {
        let username = username.trim();
        if username != self.account.username.trim() || password.trim() != self.account.password.trim() {
            warn!(username = %username, "Rejected login");
            self.events.push(
                Event::auth(EventLevel::Warning, "Rejected login attempt")
                    .with_details(serde_json::json!({ "username": username })),
            );
            return Err(FleetError::InvalidCredentials);
        }

        let session = UserSession {
            name: self.account.display_name.clone(),
            username: username.to_string(),
            role: self.account.role.clone(),
            login_time: now,
        };
        self.session = Some(session.clone());
        self.persist();

        info!(username = %username, "Operator logged in");
        self.events.push(Event::auth(EventLevel::Info, format!("{} logged in", username)).at(now));
        Ok(session)
    }

    /// Close the current session. Returns false when nobody was logged in.
    pub fn logout(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        self.persist();

        info!(username = %session.username, "Operator logged out");
        self.events
            .push(Event::auth(EventLevel::Info, format!("{} logged out", session.username)));
        true
    }

    pub fn session(&self) -> Option<&UserSession> {
        self.session.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    fn persist(&self) {
        let result = match &self.session {
            Some(session) => persistence::save_json(self.backend.as_ref(), keys::SESSION, session),
            None => self.backend.remove(keys::SESSION),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist session");
        }
    }
}
