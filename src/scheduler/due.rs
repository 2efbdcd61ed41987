//! Due-time computation.
//!
//! An action's next due time depends only on its governing spec and its call
//! record, checked in this order:
//!
//! 1. no record: due immediately (timestamp 0);
//! 2. runaway throttle still in the future: the later of throttle and override;
//! 3. explicit override from the action: that timestamp;
//! 4. otherwise: last call + jittered interval for the last outcome.

use std::collections::{HashMap, HashSet};

use crate::action::ActionId;
use crate::condition::Condition;
use crate::jitter::JitterPolicy;
use crate::spec::UpdateSpec;
use crate::store::CallRecord;

use super::registry::ActionRegistry;

/// Absolute timestamp at which an action governed by `spec` becomes due.
pub fn next_timestamp(spec: &UpdateSpec, record: Option<&CallRecord>, now: u64, jitter: &JitterPolicy) -> u64 {
    let Some(record) = record else {
        return 0;
    };

    match (record.throttled_timestamp, record.next_timestamp_override) {
        (Some(throttled), override_ts) if record.is_throttled_at(now) => throttled.max(override_ts.unwrap_or(0)),
        (_, Some(override_ts)) => override_ts,
        _ => {
            let interval = spec.interval_for(record.was_success);
            record
                .timestamp
                .saturating_add(jitter.apply(interval, record.jitter_ratio))
        }
    }
}

/// Earliest due time over all registered actions that have a matching spec.
pub(crate) fn nearest(
    registry: &ActionRegistry,
    records: &HashMap<ActionId, CallRecord>,
    active: &HashSet<Condition>,
    now: u64,
    jitter: &JitterPolicy,
) -> Option<u64> {
    registry
        .iter()
        .filter_map(|(id, registration)| {
            registration
                .matching_spec(active)
                .map(|spec| next_timestamp(spec, records.get(id), now, jitter))
        })
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::action::{ActionResult, UpdateAction};
    use crate::condition::Signal;

    fn no_jitter() -> JitterPolicy {
        JitterPolicy::default()
    }

    #[test]
    fn test_missing_record_is_due_immediately() {
        let spec = UpdateSpec::new(1000, []);
        assert_eq!(next_timestamp(&spec, None, 500, &no_jitter()), 0);
    }

    #[test]
    fn test_interval_depends_on_outcome() {
        let spec = UpdateSpec::with_failure_interval(60_000, 30_000, []);
        let ok = CallRecord::new("a", 1_000, true, 0.0);
        let failed = CallRecord::new("a", 1_000, false, 0.0);

        assert_eq!(next_timestamp(&spec, Some(&ok), 0, &no_jitter()), 61_000);
        assert_eq!(next_timestamp(&spec, Some(&failed), 0, &no_jitter()), 31_000);
    }

    #[test]
    fn test_stored_jitter_ratio_is_applied() {
        let spec = UpdateSpec::new(50, []);
        let record = CallRecord::new("a", 0, true, 0.2);
        assert_eq!(next_timestamp(&spec, Some(&record), 0, &no_jitter()), 60);
    }

    #[test]
    fn test_override_replaces_interval() {
        let spec = UpdateSpec::new(1000, []);
        let record = CallRecord::new("a", 0, true, 0.0).with_next_timestamp_override(Some(10));
        assert_eq!(next_timestamp(&spec, Some(&record), 0, &no_jitter()), 10);
    }

    #[test]
    fn test_active_throttle_wins_over_earlier_override() {
        let spec = UpdateSpec::new(10, []);
        let record = CallRecord::new("a", 0, true, 0.0)
            .with_throttled_timestamp(Some(100))
            .with_next_timestamp_override(Some(50));
        assert_eq!(next_timestamp(&spec, Some(&record), 60, &no_jitter()), 100);

        let later_override = record.clone().with_next_timestamp_override(Some(150));
        assert_eq!(next_timestamp(&spec, Some(&later_override), 60, &no_jitter()), 150);
    }

    #[test]
    fn test_expired_throttle_is_ignored() {
        let spec = UpdateSpec::new(10, []);
        let throttled_only = CallRecord::new("a", 0, true, 0.0).with_throttled_timestamp(Some(50));
        assert_eq!(next_timestamp(&spec, Some(&throttled_only), 60, &no_jitter()), 10);

        let with_override = throttled_only.with_next_timestamp_override(Some(100));
        assert_eq!(next_timestamp(&spec, Some(&with_override), 60, &no_jitter()), 100);
    }

    #[test]
    fn test_nearest_skips_unmatched_actions() {
        let off = Signal::new("off", false);
        let mut registry = ActionRegistry::new();
        registry.register(
            Arc::new(UpdateAction::new("gated", || async { ActionResult::success(()) })),
            vec![UpdateSpec::new(10, [off.condition()])],
        );
        registry.register(
            Arc::new(UpdateAction::new("open", || async { ActionResult::success(()) })),
            vec![UpdateSpec::new(500, [])],
        );

        let mut records = HashMap::new();
        records.insert("gated".to_string(), CallRecord::new("gated", 0, true, 0.0));
        records.insert("open".to_string(), CallRecord::new("open", 0, true, 0.0));

        let active = registry.active_conditions();
        assert_eq!(nearest(&registry, &records, &active, 0, &no_jitter()), Some(500));

        off.set(true);
        let active = registry.active_conditions();
        assert_eq!(nearest(&registry, &records, &active, 0, &no_jitter()), Some(10));
    }

    #[test]
    fn test_nearest_empty_registry() {
        let registry = ActionRegistry::new();
        assert_eq!(
            nearest(&registry, &HashMap::new(), &HashSet::new(), 0, &no_jitter()),
            None
        );
    }
}
