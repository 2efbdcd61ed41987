//! Scheduling specs: which cadence applies under which conditions.

use std::collections::HashSet;

use crate::condition::Condition;

/// One entry of an action's ordered scheduling policy.
///
/// An action registered with several specs is governed by the first one whose
/// conditions are all active. Put specific specs first and a catch-all spec
/// (no conditions) last.
#[derive(Debug, Clone)]
pub struct UpdateSpec {
    /// Delay after a successful execution.
    pub interval_ms: u64,
    /// Delay after a failed execution.
    pub interval_failure_ms: u64,
    conditions: HashSet<Condition>,
}

impl UpdateSpec {
    /// Same interval for success and failure.
    pub fn new(interval_ms: u64, conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self::with_failure_interval(interval_ms, interval_ms, conditions)
    }

    /// Separate success and failure intervals.
    pub fn with_failure_interval(
        interval_ms: u64,
        interval_failure_ms: u64,
        conditions: impl IntoIterator<Item = Condition>,
    ) -> Self {
        Self {
            interval_ms,
            interval_failure_ms,
            conditions: conditions.into_iter().collect(),
        }
    }

    /// Conditions required by this spec.
    pub fn conditions(&self) -> &HashSet<Condition> {
        &self.conditions
    }

    /// True when every required condition is in the active set.
    pub fn matches(&self, active: &HashSet<Condition>) -> bool {
        self.conditions.is_subset(active)
    }

    /// Base delay for the outcome of the previous call.
    pub fn interval_for(&self, was_success: bool) -> u64 {
        if was_success {
            self.interval_ms
        } else {
            self.interval_failure_ms
        }
    }
}

/// First spec matching the active conditions.
pub fn first_matching<'a>(specs: &'a [UpdateSpec], active: &HashSet<Condition>) -> Option<&'a UpdateSpec> {
    specs.iter().find(|spec| spec.matches(active))
}
