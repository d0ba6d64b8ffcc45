//! In-process record store.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::RecordStore;
use crate::domain::record::{Record, RecordFilter, RecordUpdate};
use crate::error::PersistError;

/// [`RecordStore`] kept in memory, in insertion order.
///
/// Writes for selected ids can be made to fail, which is how write-back failures are
/// exercised without a database.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<Vec<Record>>,
    failing_ids: Mutex<HashSet<String>>,
}

impl InMemoryRecordStore {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: RwLock::new(records),
            failing_ids: Mutex::new(HashSet::new()),
        }
    }

    pub fn insert(&self, record: Record) {
        let mut records = self.records.write();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.records.read().iter().find(|r| r.id == id).cloned()
    }

    /// Make every later update of `id` fail.
    pub fn fail_updates_for(&self, id: impl Into<String>) {
        self.failing_ids.lock().insert(id.into());
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_batch(&self, filter: &RecordFilter) -> Result<Vec<Record>, PersistError> {
        let records = self.records.read();
        let selected = match &filter.ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| records.iter().find(|r| &r.id == id))
                .filter(|r| filter.matches(r))
                .cloned()
                .collect(),
            None => records.iter().filter(|r| filter.matches(r)).cloned().collect(),
        };
        Ok(selected)
    }

    async fn update_record(&self, id: &str, update: RecordUpdate) -> Result<(), PersistError> {
        if self.failing_ids.lock().contains(id) {
            return Err(PersistError::Store(format!("write rejected for {}", id)));
        }

        let mut records = self.records.write();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| PersistError::RecordNotFound(id.to_string()))?;

        record.fields.extend(update.fields);
        if let Some((operation, status)) = update.status {
            record.statuses.insert(operation, status);
        }
        Ok(())
    }
}
