//! App usage tracking.
//!
//! Periodic refreshes are pointless for an app nobody opened in days. The
//! manager asks a [`UsageMonitor`] before publishing a wake-up and cancels
//! instead when the app has been idle longer than the configured cutoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::clock::Clock;

/// Reports whether the app is, or recently was, in use.
pub trait UsageMonitor: Send + Sync {
    /// True if the app is in use now or was within the last `window_ms`.
    fn was_in_use_within(&self, window_ms: u64) -> bool;

    /// Stream of in-use state changes.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Usage monitor fed by the host's foreground/background callbacks.
pub struct AppUsageMonitor {
    clock: Arc<dyn Clock>,
    in_use: watch::Sender<bool>,
    last_in_use_ms: AtomicU64,
}

impl AppUsageMonitor {
    /// Process start counts as the last use.
    pub fn new(clock: Arc<dyn Clock>, in_use: bool) -> Self {
        let now = clock.now_ms();
        let (tx, _rx) = watch::channel(in_use);
        Self {
            clock,
            in_use: tx,
            last_in_use_ms: AtomicU64::new(now),
        }
    }

    /// Restore the last-use timestamp persisted by the host.
    pub fn with_last_in_use(self, timestamp_ms: u64) -> Self {
        self.last_in_use_ms.store(timestamp_ms, Ordering::SeqCst);
        self
    }

    pub fn set_in_use(&self, in_use: bool) {
        let was_in_use = *self.in_use.borrow();
        if in_use || was_in_use {
            self.last_in_use_ms.store(self.clock.now_ms(), Ordering::SeqCst);
        }
        self.in_use.send_if_modified(|current| {
            if *current == in_use {
                false
            } else {
                *current = in_use;
                true
            }
        });
    }

    pub fn is_in_use(&self) -> bool {
        *self.in_use.borrow()
    }

    pub fn last_in_use_ms(&self) -> u64 {
        self.last_in_use_ms.load(Ordering::SeqCst)
    }
}

impl UsageMonitor for AppUsageMonitor {
    fn was_in_use_within(&self, window_ms: u64) -> bool {
        if self.is_in_use() {
            return true;
        }
        self.clock.now_ms().saturating_sub(self.last_in_use_ms()) <= window_ms
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.in_use.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const DAY: u64 = 24 * 60 * 60 * 1000;

    #[test]
    fn test_in_use_is_always_recent() {
        let clock = ManualClock::new(0);
        let monitor = AppUsageMonitor::new(Arc::new(clock.clone()), true);
        clock.advance(10 * DAY);
        assert!(monitor.was_in_use_within(DAY));
    }

    #[test]
    fn test_idle_cutoff() {
        let clock = ManualClock::new(0);
        let monitor = AppUsageMonitor::new(Arc::new(clock.clone()), true);

        clock.advance(DAY);
        monitor.set_in_use(false);
        assert_eq!(monitor.last_in_use_ms(), DAY);

        clock.advance(2 * DAY);
        assert!(monitor.was_in_use_within(2 * DAY));
        clock.advance(1);
        assert!(!monitor.was_in_use_within(2 * DAY));

        monitor.set_in_use(true);
        assert!(monitor.was_in_use_within(0));
    }

    #[test]
    fn test_restored_last_use() {
        let clock = ManualClock::new(5 * DAY);
        let monitor = AppUsageMonitor::new(Arc::new(clock), false).with_last_in_use(0);
        assert!(!monitor.was_in_use_within(2 * DAY));
    }

    #[tokio::test]
    async fn test_subscribe_sees_changes() {
        let monitor = AppUsageMonitor::new(Arc::new(ManualClock::new(0)), false);
        let mut rx = monitor.subscribe();

        monitor.set_in_use(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
