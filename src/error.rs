//! Error types for Cadence
//!
//! Centralized error handling using thiserror. Action failures are not errors:
//! they travel through `ActionResult::is_success` and never reach this enum.

use thiserror::Error;

/// All error types that can occur in the scheduler and its collaborators
#[derive(Debug, Error)]
pub enum CadenceError {
    /// Record store failure (load or upsert)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type alias for Cadence operations
pub type Result<T> = std::result::Result<T, CadenceError>;
