//! Cadence - conditional periodic action scheduling
//!
//! Cadence runs named actions on a cadence that depends on which conditions
//! currently hold (app in foreground, user logged in, ...), remembers when each
//! action last ran across restarts, spreads executions with jitter and
//! throttles actions that run away.

pub mod action;
pub mod api;
pub mod clock;
pub mod condition;
pub mod error;
pub mod jitter;
pub mod scheduler;
pub mod spec;
pub mod store;
pub mod usage;
pub mod wakeup;

pub use action::{ActionId, ActionResult, UpdateAction};
pub use condition::{Condition, Signal};
pub use error::{CadenceError, Result};
pub use scheduler::{ManagerBuilder, PeriodicUpdateManager, SchedulerConfig};
pub use spec::UpdateSpec;
