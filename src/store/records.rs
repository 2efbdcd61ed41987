//! Call record type for record store persistence.
//!
//! One `CallRecord` exists per action id. It describes the last execution and
//! any scheduling overrides derived from it, which is all the due-time
//! computation needs after a restart.

use serde::{Deserialize, Serialize};

use crate::action::{ActionId, CallOutcome};

/// Persisted state of an action's last execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallRecord {
    /// Action id
    pub id: ActionId,

    /// Unix timestamp in milliseconds of the last execution
    pub timestamp: u64,

    /// Outcome of the last execution
    pub was_success: bool,

    /// Jitter ratio drawn for the last execution
    pub jitter_ratio: f64,

    /// Absolute timestamp requested by the action itself
    #[serde(default)]
    pub next_timestamp_override: Option<u64>,

    /// Runaway throttle: not due before this timestamp
    #[serde(default)]
    pub throttled_timestamp: Option<u64>,
}

impl CallRecord {
    /// Record for an action's first execution.
    pub fn new(id: impl Into<ActionId>, timestamp: u64, was_success: bool, jitter_ratio: f64) -> Self {
        Self {
            id: id.into(),
            timestamp,
            was_success,
            jitter_ratio,
            next_timestamp_override: None,
            throttled_timestamp: None,
        }
    }

    pub fn with_next_timestamp_override(mut self, timestamp: Option<u64>) -> Self {
        self.next_timestamp_override = timestamp;
        self
    }

    pub fn with_throttled_timestamp(mut self, timestamp: Option<u64>) -> Self {
        self.throttled_timestamp = timestamp;
        self
    }

    /// Fold a new execution into this record. The throttle survives.
    pub fn after_call(&self, timestamp: u64, outcome: &CallOutcome, jitter_ratio: f64, next_override: Option<u64>) -> Self {
        Self {
            id: self.id.clone(),
            timestamp,
            was_success: outcome.is_success,
            jitter_ratio,
            next_timestamp_override: next_override,
            throttled_timestamp: self.throttled_timestamp,
        }
    }

    /// Whether a runaway throttle is active at `now`.
    pub fn is_throttled_at(&self, now: u64) -> bool {
        self.throttled_timestamp.is_some_and(|until| until > now)
    }
}
