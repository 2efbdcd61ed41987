//! Scheduler module for conditional periodic actions.
//!
//! This module provides:
//! - **Due-time computation**: When an action is next due, from its governing
//!   spec and its call record (interval, failure interval, jitter, overrides,
//!   runaway throttle).
//! - **Runaway detection**: A sliding window that throttles actions executing
//!   abnormally often.
//! - **PeriodicUpdateManager**: Registers actions, executes due ones and keeps
//!   the wake-up scheduler pointed at the nearest due time.
//!
//! # Architecture
//!
//! The manager is trigger driven:
//! 1. Condition, network and usage observers plus the wake-up scheduler queue
//!    [`Trigger`]s
//! 2. A single controller task consumes the queue and runs a pass per trigger
//! 3. A pass executes each due action that isn't already running
//! 4. Results are folded into call records and persisted
//!
//! # Example
//!
//! ```ignore
//! use cadence::scheduler::PeriodicUpdateManager;
//! use cadence::store::SqliteRecordStore;
//!
//! let store = Arc::new(SqliteRecordStore::open_at(Path::new("/tmp/cadence"))?);
//! let manager = PeriodicUpdateManager::builder(store).build()?;
//! manager.register(&action, [UpdateSpec::new(15 * 60 * 1000, [])]);
//! manager.start().await?;
//! ```

mod config;
mod due;
mod manager;
mod registry;
mod runaway;
pub(crate) mod triggers;

pub use config::SchedulerConfig;
pub use due::next_timestamp;
pub use manager::{ManagerBuilder, PeriodicUpdateManager, RunawayHook};
pub use runaway::RunawayDetector;
pub use triggers::{Trigger, TriggerSender};
