//! Alert state persistence
//!
//! Each check that is currently alerting owns exactly one [`AlertState`]
//! record, keyed by check name. Records survive process restarts so the
//! debounce window spans separate invocations.

pub mod file;

pub use file::FileStateStore;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Persisted alert record for one check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    /// Check name this record belongs to
    pub check: String,
    /// When the current failure was first alerted
    pub first_alert_time: DateTime<Utc>,
    /// When the last alert was sent (or attempted)
    pub last_alert_time: DateTime<Utc>,
    /// Number of alerts sent for the current failure
    pub alerts_sent: u32,
    /// Error from the most recent delivery attempt, if it failed
    #[serde(default)]
    pub last_delivery_error: Option<String>,
}

impl AlertState {
    /// Fresh record for a check that just became unhealthy
    pub fn new(check: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            check: check.into(),
            first_alert_time: now,
            last_alert_time: now,
            alerts_sent: 1,
            last_delivery_error: None,
        }
    }

    /// Record a repeat alert
    pub fn realert(&mut self, now: DateTime<Utc>) {
        self.last_alert_time = now;
        self.alerts_sent = self.alerts_sent.saturating_add(1);
    }
}

/// Key-value store for alert records
pub trait AlertStateStore: Send + Sync {
    /// Read the record for a check
    fn load(&self, check: &str) -> Result<Option<AlertState>, StateError>;

    /// Create or replace the record for `state.check`
    fn save(&self, state: &AlertState) -> Result<(), StateError>;

    /// Delete the record for a check, returning whether one existed
    fn clear(&self, check: &str) -> Result<bool, StateError>;

    /// All stored records
    fn list(&self) -> Result<Vec<AlertState>, StateError>;
}

/// Filesystem-safe key for a check name
///
/// Characters outside `[A-Za-z0-9._-]` become `_`, and a hash of the raw
/// name is appended so names that sanitize alike still get distinct keys.
pub fn state_key(check: &str) -> String {
    let stem: String = check
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!("{}-{:016x}", stem, fxhash::hash64(check.as_bytes()))
}

/// In-memory store, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: RwLock<HashMap<String, AlertState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl AlertStateStore for MemoryStateStore {
    fn load(&self, check: &str) -> Result<Option<AlertState>, StateError> {
        Ok(self.records.read().get(check).cloned())
    }

    fn save(&self, state: &AlertState) -> Result<(), StateError> {
        self.records
            .write()
            .insert(state.check.clone(), state.clone());
        Ok(())
    }

    fn clear(&self, check: &str) -> Result<bool, StateError> {
        Ok(self.records.write().remove(check).is_some())
    }

    fn list(&self) -> Result<Vec<AlertState>, StateError> {
        let mut states: Vec<AlertState> = self.records.read().values().cloned().collect();
        states.sort_by(|a, b| a.check.cmp(&b.check));
        Ok(states)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corrupted record: {0}")]
    Corrupted(String),
}
