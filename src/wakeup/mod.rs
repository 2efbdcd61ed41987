//! Wake-up mechanisms.
//!
//! After every pass the manager publishes the single nearest due timestamp to
//! a [`WakeupScheduler`], or cancels it when nothing is scheduled. When the
//! wake-up fires, the implementation queues [`Trigger::Wakeup`] through a
//! [`TriggerSender`].
//!
//! - **TimerWakeup**: in-process tokio timer (process must stay alive)
//! - **ForegroundWakeup**: routes to the in-process timer while the app is in
//!   foreground and to a deferred, OS-level scheduler otherwise
//! - **RecordingWakeup**: records calls, for tests
//!
//! [`Trigger::Wakeup`]: crate::scheduler::Trigger::Wakeup
//! [`TriggerSender`]: crate::scheduler::TriggerSender

mod foreground;
mod recording;
mod timer;

pub use foreground::ForegroundWakeup;
pub use recording::{RecordingWakeup, WakeupCall};
pub use timer::TimerWakeup;

/// External mechanism that wakes the scheduler at a timestamp.
///
/// Implementations must be idempotent: scheduling the same timestamp twice in
/// a row must not redo expensive work.
pub trait WakeupScheduler: Send + Sync {
    /// Fire at `timestamp_ms` (Unix ms), replacing any pending wake-up.
    fn schedule_at(&self, timestamp_ms: u64);

    /// Drop any pending wake-up.
    fn cancel(&self);
}
