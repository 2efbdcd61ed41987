//! Re-evaluation triggers.
//!
//! Everything that can change what is due (condition flips, network
//! transitions, wake-ups, registrations) is turned into a [`Trigger`] and
//! queued to the manager's controller task, which handles them one at a time.

use tokio::sync::mpsc;

/// Why the controller should re-evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The wake-up scheduler fired.
    Wakeup,
    /// The set of active conditions changed.
    ConditionsChanged,
    /// Network availability changed.
    NetworkChanged { available: bool },
    /// App foreground state changed. Only reschedules, never executes.
    ForegroundChanged { in_use: bool },
    /// An action was registered or unregistered.
    ActionsChanged,
}

impl Trigger {
    /// Whether this trigger runs an execution pass or only recomputes the
    /// next wake-up.
    pub fn runs_pass(&self) -> bool {
        !matches!(self, Trigger::ForegroundChanged { .. })
    }
}

/// Cloneable handle for queueing triggers, e.g. from a wake-up callback.
#[derive(Debug, Clone)]
pub struct TriggerSender {
    tx: mpsc::UnboundedSender<Trigger>,
}

impl TriggerSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Trigger>) -> Self {
        Self { tx }
    }

    /// Queue a trigger. Returns false once the controller has shut down.
    pub fn send(&self, trigger: Trigger) -> bool {
        self.tx.send(trigger).is_ok()
    }

    /// Shorthand for the wake-up callback.
    pub fn wakeup(&self) -> bool {
        self.send(Trigger::Wakeup)
    }
}

/// Create a connected sender/receiver pair.
pub(crate) fn channel() -> (TriggerSender, mpsc::UnboundedReceiver<Trigger>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TriggerSender::new(tx), rx)
}
