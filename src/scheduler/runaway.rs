//! Runaway detection for actions that execute abnormally often.
//!
//! A bug in an action (e.g. a tiny delay override returned on every call) can
//! make it fire in a tight loop. The detector keeps a sliding window of recent
//! executions across all actions and reports the worst offender once it
//! exceeds the allowed count. The caller throttles that action and clears its
//! entries so it isn't re-flagged the moment the throttle ends.

use std::collections::VecDeque;

use crate::action::ActionId;

#[derive(Debug, Clone)]
struct RecentExecution {
    id: ActionId,
    timestamp: u64,
}

/// Sliding-window execution counter.
#[derive(Debug)]
pub struct RunawayDetector {
    window_ms: u64,
    max_allowed_executions: usize,
    /// Newest first.
    recent: VecDeque<RecentExecution>,
}

impl RunawayDetector {
    pub fn new(window_ms: u64, max_allowed_executions: usize) -> Self {
        Self {
            window_ms,
            max_allowed_executions,
            recent: VecDeque::new(),
        }
    }

    /// Record an execution and return the runaway action id, if any.
    ///
    /// When several actions exceed the limit the one with the most entries
    /// wins; ties go to the most recently executed.
    pub fn on_action_executed(&mut self, id: &str, now: u64) -> Option<ActionId> {
        self.recent.push_front(RecentExecution {
            id: id.to_string(),
            timestamp: now,
        });
        self.remove_old(now);

        let mut counts: Vec<(&str, usize)> = Vec::new();
        for execution in &self.recent {
            match counts.iter_mut().find(|(seen, _)| *seen == execution.id) {
                Some((_, count)) => *count += 1,
                None => counts.push((&execution.id, 1)),
            }
        }

        let mut worst: Option<(&str, usize)> = None;
        for (candidate, count) in counts {
            if worst.is_none_or(|(_, worst_count)| count > worst_count) {
                worst = Some((candidate, count));
            }
        }

        worst
            .filter(|(_, count)| *count > self.max_allowed_executions)
            .map(|(id, _)| id.to_string())
    }

    /// Forget all entries of a throttled action.
    pub fn on_action_throttled(&mut self, id: &str) {
        self.recent.retain(|execution| execution.id != id);
    }

    /// Entries currently in the window.
    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    fn remove_old(&mut self, now: u64) {
        let Some(threshold) = now.checked_sub(self.window_ms) else {
            return;
        };
        self.recent.retain(|execution| execution.timestamp > threshold);
    }
}
