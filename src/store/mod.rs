//! Persistence for call records.
//!
//! The scheduler loads every record once at startup and afterwards only
//! writes: the in-memory map is the source of truth, the store is a
//! write-behind copy that lets backoff state survive restarts.
//!
//! Two implementations are provided:
//! - **MemoryRecordStore**: process-local, for tests and ephemeral use
//! - **SqliteRecordStore**: one row per action id in a SQLite database
//!
//! # Example
//!
//! ```ignore
//! use cadence::store::{RecordStore, SqliteRecordStore};
//!
//! let store = SqliteRecordStore::open_at(Path::new("/var/lib/app"))?;
//! let records = store.load_all().await?;
//! ```

mod memory_store;
mod records;
mod sqlite_store;

use async_trait::async_trait;

use crate::error::Result;

pub use memory_store::MemoryRecordStore;
pub use records::CallRecord;
pub use sqlite_store::SqliteRecordStore;

/// Storage backend for call records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load every persisted record.
    async fn load_all(&self) -> Result<Vec<CallRecord>>;

    /// Insert or replace the record for `record.id`.
    async fn upsert(&self, record: &CallRecord) -> Result<()>;
}
