//! SQLite-backed record store.
//!
//! Records live in a single `call_records` table keyed by action id. Writes are
//! `INSERT OR REPLACE`, so `upsert` is one statement per execution.
//!
//! `rusqlite::Connection` isn't Sync, so it sits behind a `Mutex`. SQLite
//! operations here are single-row and quick; they run inline on the caller's
//! task.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{CadenceError, Result};
use crate::store::{CallRecord, RecordStore};

const DB_FILE: &str = "records.db";

/// Record store persisting to `<dir>/records.db`.
pub struct SqliteRecordStore {
    path: PathBuf,
    db: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRecordStore").field("path", &self.path).finish_non_exhaustive()
    }
}

impl SqliteRecordStore {
    /// Open or create the store inside `dir`, creating the directory if needed.
    pub fn open_at(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(DB_FILE);
        let db = Connection::open(&path)?;
        Self::init_schema(&db)?;

        tracing::debug!(path = %path.display(), "Opened call record store");
        Ok(Self {
            path,
            db: Mutex::new(db),
        })
    }

    /// Store without a backing file. Contents vanish with the process.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            db: Mutex::new(db),
        })
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS call_records (
                id TEXT PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                was_success INTEGER NOT NULL,
                jitter_ratio REAL NOT NULL,
                next_timestamp_override INTEGER,
                throttled_timestamp INTEGER
            );
            "#,
        )?;
        Ok(())
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch a single record.
    pub fn get(&self, id: &str) -> Result<Option<CallRecord>> {
        let db = self.lock()?;
        let record = db
            .query_row(
                "SELECT id, timestamp, was_success, jitter_ratio, next_timestamp_override, throttled_timestamp
                 FROM call_records WHERE id = ?1",
                [id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|e| CadenceError::Storage(e.to_string()))
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<CallRecord> {
    let timestamp: i64 = row.get(1)?;
    let next_override: Option<i64> = row.get(4)?;
    let throttled: Option<i64> = row.get(5)?;
    Ok(CallRecord {
        id: row.get(0)?,
        timestamp: timestamp.max(0) as u64,
        was_success: row.get(2)?,
        jitter_ratio: row.get(3)?,
        next_timestamp_override: next_override.map(|ts| ts.max(0) as u64),
        throttled_timestamp: throttled.map(|ts| ts.max(0) as u64),
    })
}

fn to_sql_ts(ts: u64) -> i64 {
    i64::try_from(ts).unwrap_or(i64::MAX)
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn load_all(&self) -> Result<Vec<CallRecord>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(
            "SELECT id, timestamp, was_success, jitter_ratio, next_timestamp_override, throttled_timestamp
             FROM call_records ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    async fn upsert(&self, record: &CallRecord) -> Result<()> {
        let db = self.lock()?;
        db.execute(
            r#"
            INSERT OR REPLACE INTO call_records
            (id, timestamp, was_success, jitter_ratio, next_timestamp_override, throttled_timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.id,
                to_sql_ts(record.timestamp),
                record.was_success,
                record.jitter_ratio,
                record.next_timestamp_override.map(to_sql_ts),
                record.throttled_timestamp.map(to_sql_ts),
            ],
        )?;
        Ok(())
    }
}
