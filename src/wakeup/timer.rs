//! In-process timer wake-up.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::scheduler::TriggerSender;
use crate::wakeup::WakeupScheduler;

struct Pending {
    timestamp_ms: u64,
    handle: JoinHandle<()>,
}

/// Wakes the scheduler with a tokio sleep. Requires a running tokio runtime.
pub struct TimerWakeup {
    clock: Arc<dyn Clock>,
    triggers: TriggerSender,
    pending: Mutex<Option<Pending>>,
}

impl TimerWakeup {
    pub fn new(clock: Arc<dyn Clock>, triggers: TriggerSender) -> Self {
        Self {
            clock,
            triggers,
            pending: Mutex::new(None),
        }
    }

    /// Timestamp of the pending wake-up, if any.
    pub fn pending_at(&self) -> Option<u64> {
        let pending = self.pending.lock().ok()?;
        pending
            .as_ref()
            .filter(|p| !p.handle.is_finished())
            .map(|p| p.timestamp_ms)
    }
}

impl WakeupScheduler for TimerWakeup {
    fn schedule_at(&self, timestamp_ms: u64) {
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        if let Some(current) = pending.as_ref()
            && current.timestamp_ms == timestamp_ms
            && !current.handle.is_finished()
        {
            return;
        }
        if let Some(previous) = pending.take() {
            previous.handle.abort();
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!(error = %e, "No tokio runtime, wake-up not scheduled");
                return;
            }
        };

        let delay = timestamp_ms.saturating_sub(self.clock.now_ms());
        let triggers = self.triggers.clone();
        tracing::debug!(timestamp_ms, delay_ms = delay, "Scheduling in-process wake-up");
        let handle = runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            triggers.wakeup();
        });
        *pending = Some(Pending { timestamp_ms, handle });
    }

    fn cancel(&self) {
        if let Ok(mut pending) = self.pending.lock()
            && let Some(previous) = pending.take()
        {
            previous.handle.abort();
        }
    }
}

impl Drop for TimerWakeup {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::scheduler::{Trigger, triggers};

    #[tokio::test(start_paused = true)]
    async fn test_fires_wakeup_trigger() {
        let clock = ManualClock::new(1_000);
        let (sender, mut rx) = triggers::channel();
        let timer = TimerWakeup::new(Arc::new(clock), sender);

        timer.schedule_at(1_500);
        assert_eq!(timer.pending_at(), Some(1_500));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(rx.recv().await, Some(Trigger::Wakeup));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_timestamp_is_idempotent() {
        let clock = ManualClock::new(0);
        let (sender, mut rx) = triggers::channel();
        let timer = TimerWakeup::new(Arc::new(clock), sender);

        timer.schedule_at(100);
        timer.schedule_at(100);
        timer.schedule_at(100);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rx.recv().await, Some(Trigger::Wakeup));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending() {
        let clock = ManualClock::new(0);
        let (sender, mut rx) = triggers::channel();
        let timer = TimerWakeup::new(Arc::new(clock), sender);

        timer.schedule_at(1_000);
        timer.schedule_at(50);
        assert_eq!(timer.pending_at(), Some(50));

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(rx.recv().await, Some(Trigger::Wakeup));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let clock = ManualClock::new(0);
        let (sender, mut rx) = triggers::channel();
        let timer = TimerWakeup::new(Arc::new(clock), sender);

        timer.schedule_at(10);
        timer.cancel();
        assert_eq!(timer.pending_at(), None);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }
}
