//! Scheduler policy configuration.

use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};
use crate::jitter::{JitterPolicy, MAX_JITTER_DELAY_MS, MAX_JITTER_RATIO};

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Policy constants for jitter, runaway protection and delay overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound (exclusive) of the per-execution jitter ratio.
    pub max_jitter_ratio: f64,
    /// Cap for the absolute jitter added to a single delay.
    pub max_jitter_delay_ms: u64,
    /// Length of the runaway detection window.
    pub runaway_window_ms: u64,
    /// Executions allowed per window before an action counts as runaway.
    pub runaway_threshold: usize,
    /// How long a runaway action is throttled (before jitter).
    pub runaway_delay_ms: u64,
    /// Longest delay an action may request for its next call.
    pub max_delay_override_ms: u64,
    /// Stop scheduling wake-ups when the app has been idle this long.
    pub app_idle_cutoff_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_jitter_ratio: MAX_JITTER_RATIO,
            max_jitter_delay_ms: MAX_JITTER_DELAY_MS,
            runaway_window_ms: 10 * MINUTE_MS,
            runaway_threshold: 5,
            runaway_delay_ms: HOUR_MS,
            max_delay_override_ms: 7 * DAY_MS,
            app_idle_cutoff_ms: 2 * DAY_MS,
        }
    }
}

impl SchedulerConfig {
    pub fn with_jitter(mut self, max_ratio: f64, max_delay_ms: u64) -> Self {
        self.max_jitter_ratio = max_ratio;
        self.max_jitter_delay_ms = max_delay_ms;
        self
    }

    pub fn with_runaway(mut self, window_ms: u64, threshold: usize, delay_ms: u64) -> Self {
        self.runaway_window_ms = window_ms;
        self.runaway_threshold = threshold;
        self.runaway_delay_ms = delay_ms;
        self
    }

    pub fn with_max_delay_override(mut self, max_ms: u64) -> Self {
        self.max_delay_override_ms = max_ms;
        self
    }

    pub fn with_app_idle_cutoff(mut self, cutoff_ms: u64) -> Self {
        self.app_idle_cutoff_ms = cutoff_ms;
        self
    }

    pub fn jitter_policy(&self) -> JitterPolicy {
        JitterPolicy::new(self.max_jitter_ratio, self.max_jitter_delay_ms)
    }

    /// Reject values the scheduling math can't work with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.max_jitter_ratio) {
            return Err(CadenceError::Config(format!(
                "max_jitter_ratio must be in [0, 1), got {}",
                self.max_jitter_ratio
            )));
        }
        if self.runaway_threshold == 0 {
            return Err(CadenceError::Config("runaway_threshold must be at least 1".to_string()));
        }
        if self.runaway_window_ms == 0 {
            return Err(CadenceError::Config("runaway_window_ms must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_jitter_ratio, 0.2);
        assert_eq!(config.max_jitter_delay_ms, 3_600_000);
        assert_eq!(config.runaway_window_ms, 600_000);
        assert_eq!(config.runaway_threshold, 5);
        assert_eq!(config.runaway_delay_ms, 3_600_000);
        assert_eq!(config.max_delay_override_ms, 7 * 86_400_000);
        assert_eq!(config.app_idle_cutoff_ms, 2 * 86_400_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scheduler_config_builder() {
        let config = SchedulerConfig::default()
            .with_jitter(0.1, 1000)
            .with_runaway(60_000, 3, 5_000)
            .with_max_delay_override(10_000)
            .with_app_idle_cutoff(1);

        assert_eq!(config.jitter_policy(), JitterPolicy::new(0.1, 1000));
        assert_eq!(config.runaway_threshold, 3);
        assert_eq!(config.runaway_delay_ms, 5_000);
        assert_eq!(config.max_delay_override_ms, 10_000);
        assert_eq!(config.app_idle_cutoff_ms, 1);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(SchedulerConfig::default().with_jitter(1.0, 0).validate().is_err());
        assert!(SchedulerConfig::default().with_jitter(-0.1, 0).validate().is_err());
        assert!(SchedulerConfig::default().with_runaway(1, 0, 1).validate().is_err());
        assert!(SchedulerConfig::default().with_runaway(0, 1, 1).validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: SchedulerConfig = serde_yaml::from_str("runaway_threshold: 8\n").unwrap();
        assert_eq!(config.runaway_threshold, 8);
        assert_eq!(config.runaway_window_ms, 600_000);
    }
}
