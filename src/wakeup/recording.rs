//! Wake-up scheduler that only records what it was asked to do.

use tokio::sync::watch;

use crate::wakeup::WakeupScheduler;

/// One call made to a [`WakeupScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupCall {
    ScheduleAt(u64),
    Cancel,
}

/// Records every call. Useful in tests and as a stand-in for an OS scheduler.
#[derive(Debug)]
pub struct RecordingWakeup {
    calls: watch::Sender<Vec<WakeupCall>>,
}

impl Default for RecordingWakeup {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingWakeup {
    pub fn new() -> Self {
        let (calls, _rx) = watch::channel(Vec::new());
        Self { calls }
    }

    /// All calls so far, oldest first.
    pub fn calls(&self) -> Vec<WakeupCall> {
        self.calls.borrow().clone()
    }

    pub fn last(&self) -> Option<WakeupCall> {
        self.calls.borrow().last().copied()
    }

    /// Timestamps passed to `schedule_at`, oldest first.
    pub fn scheduled(&self) -> Vec<u64> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                WakeupCall::ScheduleAt(ts) => Some(*ts),
                WakeupCall::Cancel => None,
            })
            .collect()
    }

    pub fn schedule_count(&self, timestamp_ms: u64) -> usize {
        self.scheduled().iter().filter(|ts| **ts == timestamp_ms).count()
    }

    pub fn cancel_count(&self) -> usize {
        self.calls.borrow().iter().filter(|call| **call == WakeupCall::Cancel).count()
    }

    /// Wait until the recorded calls satisfy `predicate`.
    pub async fn wait_for(&self, predicate: impl Fn(&[WakeupCall]) -> bool) {
        let mut rx = self.calls.subscribe();
        let _ = rx.wait_for(|calls| predicate(calls)).await;
    }

    fn record(&self, call: WakeupCall) {
        self.calls.send_modify(|calls| calls.push(call));
    }
}

impl WakeupScheduler for RecordingWakeup {
    fn schedule_at(&self, timestamp_ms: u64) {
        self.record(WakeupCall::ScheduleAt(timestamp_ms));
    }

    fn cancel(&self) {
        self.record(WakeupCall::Cancel);
    }
}
