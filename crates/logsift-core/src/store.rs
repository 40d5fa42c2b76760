//! In-memory record storage.
//!
//! This module provides:
//! - [`MemoryRecordStore`]: Thread-safe store for tests and ephemeral sessions
//! - [`shared_memory_store`]: Convenience constructor for an injected handle
//! - Implementation of [`RecordStore`] and [`StagedWrite`]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::index::RecordIndex;
use crate::traits::{RecordStore, StagedWrite};
use crate::types::{LineNumber, LogRecord};

/// Records plus their secondary index, guarded together.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    records: BTreeMap<LineNumber, LogRecord>,
    index: RecordIndex,
}

impl StoreState {
    pub(crate) fn from_records(records: BTreeMap<LineNumber, LogRecord>) -> Self {
        let index = RecordIndex::from_records(records.values());
        Self { records, index }
    }

    pub(crate) fn upsert(&mut self, record: LogRecord) {
        if let Some(previous) = self.records.get(&record.line_number) {
            self.index.remove(previous);
        }
        self.index.insert(&record);
        self.records.insert(record.line_number, record);
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }

    pub(crate) fn replace(&mut self, records: BTreeMap<LineNumber, LogRecord>) {
        *self = Self::from_records(records);
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn get(&self, line_number: LineNumber) -> Option<LogRecord> {
        self.records.get(&line_number).cloned()
    }

    pub(crate) fn all(&self) -> Vec<LogRecord> {
        self.records.values().cloned().collect()
    }

    pub(crate) fn by_keys(&self, keys: &[LineNumber]) -> Vec<LogRecord> {
        keys.iter()
            .filter_map(|key| self.records.get(key).cloned())
            .collect()
    }

    pub(crate) const fn index(&self) -> &RecordIndex {
        &self.index
    }
}

/// Clears the staging flag when a staged write ends, committed or not.
struct StagingGuard<'a>(&'a AtomicBool);

impl<'a> StagingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, StoreError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StoreError::StagingActive)?;
        Ok(Self(flag))
    }
}

impl Drop for StagingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Thread-safe in-memory record store.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: RwLock<StoreState>,
    staging: AtomicBool,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `records`.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = LogRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.line_number, record))
            .collect();
        Self {
            state: RwLock::new(StoreState::from_records(records)),
            staging: AtomicBool::new(false),
        }
    }
}

impl RecordStore for MemoryRecordStore {
    fn clear(&self) -> Result<(), StoreError> {
        self.state.write().clear();
        Ok(())
    }

    fn bulk_put(&self, records: &[LogRecord]) -> Result<(), StoreError> {
        let mut state = self.state.write();
        for record in records {
            state.upsert(record.clone());
        }
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<LogRecord>, StoreError> {
        Ok(self.state.read().all())
    }

    fn get(&self, line_number: LineNumber) -> Result<Option<LogRecord>, StoreError> {
        Ok(self.state.read().get(line_number))
    }

    fn get_by_keys(&self, keys: &[LineNumber]) -> Result<Vec<LogRecord>, StoreError> {
        Ok(self.state.read().by_keys(keys))
    }

    fn len(&self) -> usize {
        self.state.read().len()
    }

    fn stage(&self) -> Result<Box<dyn StagedWrite + '_>, StoreError> {
        let guard = StagingGuard::acquire(&self.staging)?;
        Ok(Box::new(MemoryStagedWrite {
            store: self,
            shadow: BTreeMap::new(),
            _guard: guard,
        }))
    }

    fn keys_by_log_type(&self, log_type: &str) -> Vec<LineNumber> {
        self.state.read().index().by_log_type(log_type)
    }

    fn keys_by_serial(&self, serial_number: &str) -> Vec<LineNumber> {
        self.state.read().index().by_serial(serial_number)
    }

    fn keys_in_time_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<LineNumber> {
        self.state.read().index().in_time_range(start, end)
    }

    fn keys_by_time_and_type(
        &self,
        log_type: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<LineNumber> {
        self.state.read().index().by_time_and_type(log_type, start, end)
    }
}

/// Shadow collection for a [`MemoryRecordStore`].
struct MemoryStagedWrite<'a> {
    store: &'a MemoryRecordStore,
    shadow: BTreeMap<LineNumber, LogRecord>,
    _guard: StagingGuard<'a>,
}

impl StagedWrite for MemoryStagedWrite<'_> {
    fn put_batch(&mut self, records: &[LogRecord]) -> Result<(), StoreError> {
        for record in records {
            self.shadow.insert(record.line_number, record.clone());
        }
        Ok(())
    }

    fn staged_len(&self) -> usize {
        self.shadow.len()
    }

    fn commit(mut self: Box<Self>, expected_len: usize) -> Result<(), StoreError> {
        let actual = self.shadow.len();
        if actual != expected_len {
            return Err(StoreError::CountMismatch {
                expected: expected_len,
                actual,
            });
        }

        let shadow = std::mem::take(&mut self.shadow);
        self.store.state.write().replace(shadow);
        debug!(records = actual, "swapped staged records into memory store");
        Ok(())
    }
}

/// Shared record store handle.
pub type SharedRecordStore = Arc<dyn RecordStore>;

/// Creates an empty in-memory store behind a shared handle.
#[must_use]
pub fn shared_memory_store() -> SharedRecordStore {
    Arc::new(MemoryRecordStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line_number: LineNumber, log_type: &str) -> LogRecord {
        LogRecord {
            line_number,
            timestamp: DateTime::from_timestamp(1_710_419_696 + line_number as i64, 0)
                .unwrap_or_default(),
            serial_number: "AB12".to_string(),
            log_type: log_type.to_string(),
            content: format!("line {line_number}"),
        }
    }

    fn records(n: u64) -> Vec<LogRecord> {
        (1..=n).map(|i| record(i, if i % 2 == 0 { "app" } else { "kernel" })).collect()
    }

    // ===========================================
    // Basic Operations
    // ===========================================

    #[test]
    fn bulk_put_and_get_all() {
        let store = MemoryRecordStore::new();
        assert!(store.is_empty());

        store.bulk_put(&records(5)).expect("put");
        assert_eq!(store.len(), 5);

        let all = store.get_all().expect("get_all");
        let keys: Vec<_> = all.iter().map(|r| r.line_number).collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn bulk_put_is_idempotent_upsert() {
        let store = MemoryRecordStore::new();
        store.bulk_put(&records(3)).expect("put");
        store.bulk_put(&records(3)).expect("put again");
        assert_eq!(store.len(), 3);

        let mut changed = record(2, "watchdog");
        changed.content = "replaced".to_string();
        store.bulk_put(&[changed.clone()]).expect("upsert");

        assert_eq!(store.len(), 3);
        assert_eq!(store.get(2).expect("get"), Some(changed));
        assert!(store.keys_by_log_type("app").is_empty());
        assert_eq!(store.keys_by_log_type("watchdog"), vec![2]);
    }

    #[test]
    fn get_by_keys_preserves_order_and_drops_missing() {
        let store = MemoryRecordStore::with_records(records(10));

        let found = store.get_by_keys(&[9, 42, 3, 7, 0]).expect("get_by_keys");
        let keys: Vec<_> = found.iter().map(|r| r.line_number).collect();
        assert_eq!(keys, vec![9, 3, 7]);

        assert!(store.get_by_keys(&[]).expect("empty").is_empty());
    }

    #[test]
    fn clear_removes_everything() {
        let store = MemoryRecordStore::with_records(records(4));
        store.clear().expect("clear");
        assert!(store.is_empty());
        assert!(store.get_all().expect("get_all").is_empty());
        assert!(store.keys_by_serial("AB12").is_empty());
    }

    #[test]
    fn secondary_lookups() {
        let store = MemoryRecordStore::with_records(records(6));

        assert_eq!(store.keys_by_log_type("kernel"), vec![1, 3, 5]);
        assert_eq!(store.keys_by_serial("AB12"), vec![1, 2, 3, 4, 5, 6]);

        let start = DateTime::from_timestamp(1_710_419_696 + 2, 0);
        let end = DateTime::from_timestamp(1_710_419_696 + 4, 0);
        assert_eq!(store.keys_in_time_range(start, end), vec![2, 3, 4]);
        assert_eq!(store.keys_by_time_and_type("app", start, end), vec![2, 4]);
    }

    // ===========================================
    // Staged Writes
    // ===========================================

    #[test]
    fn staged_commit_replaces_live_records() {
        let store = MemoryRecordStore::with_records(records(10));

        let mut staged = store.stage().expect("stage");
        staged.put_batch(&records(2)).expect("batch 1");
        staged.put_batch(&[record(3, "late")]).expect("batch 2");
        assert_eq!(staged.staged_len(), 3);

        // Live data is untouched until commit.
        assert_eq!(store.len(), 10);

        staged.commit(3).expect("commit");
        assert_eq!(store.len(), 3);
        assert_eq!(store.keys_by_log_type("late"), vec![3]);
    }

    #[test]
    fn staged_count_mismatch_keeps_live_records() {
        let store = MemoryRecordStore::with_records(records(4));

        let mut staged = store.stage().expect("stage");
        staged.put_batch(&records(2)).expect("batch");
        let result = staged.commit(5);

        assert!(matches!(
            result,
            Err(StoreError::CountMismatch {
                expected: 5,
                actual: 2
            })
        ));
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn dropped_stage_discards_shadow() {
        let store = MemoryRecordStore::with_records(records(4));
        {
            let mut staged = store.stage().expect("stage");
            staged.put_batch(&records(1)).expect("batch");
        }
        assert_eq!(store.len(), 4);

        // The staging slot is free again.
        assert!(store.stage().is_ok());
    }

    #[test]
    fn only_one_stage_at_a_time() {
        let store = MemoryRecordStore::new();
        let first = store.stage().expect("stage");
        assert!(matches!(store.stage(), Err(StoreError::StagingActive)));
        drop(first);
        assert!(store.stage().is_ok());
    }

    #[test]
    fn shared_handle_is_usable_as_trait_object() {
        let store = shared_memory_store();
        store.bulk_put(&records(2)).expect("put");
        assert_eq!(store.len(), 2);
    }
}
