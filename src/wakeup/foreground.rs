//! Foreground-aware wake-up routing.

use std::sync::Arc;

use tokio::sync::watch;

use crate::wakeup::WakeupScheduler;

/// Uses a lightweight in-process timer while the app is in foreground and the
/// deferred (OS-level) mechanism in background. Only one of the two holds a
/// pending wake-up at a time.
pub struct ForegroundWakeup {
    foreground: watch::Receiver<bool>,
    in_process: Arc<dyn WakeupScheduler>,
    deferred: Arc<dyn WakeupScheduler>,
}

impl ForegroundWakeup {
    pub fn new(
        foreground: watch::Receiver<bool>,
        in_process: Arc<dyn WakeupScheduler>,
        deferred: Arc<dyn WakeupScheduler>,
    ) -> Self {
        Self {
            foreground,
            in_process,
            deferred,
        }
    }

    fn is_foreground(&self) -> bool {
        *self.foreground.borrow()
    }
}

impl WakeupScheduler for ForegroundWakeup {
    fn schedule_at(&self, timestamp_ms: u64) {
        if self.is_foreground() {
            self.deferred.cancel();
            self.in_process.schedule_at(timestamp_ms);
        } else {
            self.in_process.cancel();
            self.deferred.schedule_at(timestamp_ms);
        }
    }

    fn cancel(&self) {
        self.in_process.cancel();
        self.deferred.cancel();
    }
}
