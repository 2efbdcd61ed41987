//! Boolean conditions that gate scheduling specs.
//!
//! A [`Condition`] is a read-only view of a boolean signal. Its identity is the
//! `watch` channel it observes: conditions built from the same [`Signal`], or
//! from receivers of the same channel, compare equal, so sets of conditions
//! can be intersected with the set of currently-true ones.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

static NEXT_SIGNAL_ID: AtomicU64 = AtomicU64::new(1);

/// One receiver per live channel that has been given an id.
static CHANNEL_IDS: Mutex<Vec<(watch::Receiver<bool>, u64)>> = Mutex::new(Vec::new());

fn next_signal_id() -> u64 {
    NEXT_SIGNAL_ID.fetch_add(1, Ordering::Relaxed)
}

/// Stable id for the channel behind `rx`.
///
/// Entries whose sender is gone are dropped. A closed channel never changes
/// again, so a condition over it gets a fresh id.
fn channel_id(rx: &watch::Receiver<bool>) -> u64 {
    let mut known = CHANNEL_IDS.lock().unwrap_or_else(PoisonError::into_inner);
    known.retain(|(known_rx, _)| known_rx.has_changed().is_ok());

    if let Some((_, id)) = known.iter().find(|(known_rx, _)| known_rx.same_channel(rx)) {
        return *id;
    }
    let id = next_signal_id();
    if rx.has_changed().is_ok() {
        known.push((rx.clone(), id));
    }
    id
}

/// A boolean condition observed by the scheduler.
#[derive(Clone)]
pub struct Condition {
    id: u64,
    name: Arc<str>,
    rx: watch::Receiver<bool>,
}

impl Condition {
    /// Wrap an external boolean stream.
    ///
    /// Wrapping receivers of the same channel twice yields equal conditions.
    pub fn from_receiver(name: impl Into<String>, rx: watch::Receiver<bool>) -> Self {
        Self {
            id: channel_id(&rx),
            name: Arc::from(name.into()),
            rx,
        }
    }

    /// A condition whose value never changes.
    pub fn constant(name: impl Into<String>, value: bool) -> Self {
        let (_tx, rx) = watch::channel(value);
        Self::from_receiver(name, rx)
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the underlying signal is currently true.
    pub fn is_active(&self) -> bool {
        *self.rx.borrow()
    }

    /// A fresh receiver for change notifications.
    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Condition {}

impl Hash for Condition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("name", &self.name)
            .field("active", &self.is_active())
            .finish()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A settable boolean signal, e.g. "app in foreground" or "user logged in".
///
/// Clones share the same value and identity.
#[derive(Clone)]
pub struct Signal {
    id: u64,
    name: Arc<str>,
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    /// Create a signal with an initial value.
    pub fn new(name: impl Into<String>, initial: bool) -> Self {
        let (tx, rx) = watch::channel(initial);
        Self {
            id: channel_id(&rx),
            name: Arc::from(name.into()),
            tx: Arc::new(tx),
        }
    }

    /// Update the value. Observers are only notified on an actual change.
    pub fn set(&self, value: bool) {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Current value.
    pub fn get(&self) -> bool {
        *self.tx.borrow()
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A condition bound to this signal.
    pub fn condition(&self) -> Condition {
        Condition {
            id: self.id,
            name: self.name.clone(),
            rx: self.tx.subscribe(),
        }
    }

    /// A raw receiver, for collaborators that take a boolean stream.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("value", &self.get())
            .finish()
    }
}
