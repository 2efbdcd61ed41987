//! In-memory record store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{CadenceError, Result};
use crate::store::{CallRecord, RecordStore};

/// Record store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, CallRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with records, e.g. from a previous run.
    pub fn with_records(records: impl IntoIterator<Item = CallRecord>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().map(|r| (r.id.clone(), r)).collect()),
        }
    }

    /// Snapshot of a stored record.
    pub fn get(&self, id: &str) -> Option<CallRecord> {
        self.records.lock().ok().and_then(|records| records.get(id).cloned())
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load_all(&self) -> Result<Vec<CallRecord>> {
        let records = self.records.lock().map_err(|e| CadenceError::Storage(e.to_string()))?;
        let mut all: Vec<CallRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn upsert(&self, record: &CallRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|e| CadenceError::Storage(e.to_string()))?
            .insert(record.id.clone(), record.clone());
        Ok(())
    }
}
