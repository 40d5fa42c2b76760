//! Traits for record storage backends.
//!
//! This module provides the [`RecordStore`] trait for abstracting over
//! storage implementations (in-memory, file-based), and [`StagedWrite`] for
//! all-or-nothing replacement of the stored collection.

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::types::{LineNumber, LogRecord};

/// Ordered, keyed collection of [`LogRecord`]s, keyed by line number.
///
/// Stores are passed explicitly to the query engine and paginator; readers
/// never mutate them.
pub trait RecordStore: Send + Sync {
    /// Removes all records.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be truncated.
    fn clear(&self) -> Result<(), StoreError>;

    /// Upserts records by line number.
    ///
    /// Callers ingesting large files pass bounded batches; each call is
    /// committed on its own and is not rolled back if a later call fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be written.
    fn bulk_put(&self, records: &[LogRecord]) -> Result<(), StoreError>;

    /// Returns a snapshot of every stored record.
    ///
    /// Callers that need original file order must sort by line number.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be read.
    fn get_all(&self) -> Result<Vec<LogRecord>, StoreError>;

    /// Gets a record by line number.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read.
    fn get(&self, line_number: LineNumber) -> Result<Option<LogRecord>, StoreError>;

    /// Resolves keys to records in the order given; missing keys are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be read.
    fn get_by_keys(&self, keys: &[LineNumber]) -> Result<Vec<LogRecord>, StoreError>;

    /// Returns the number of stored records.
    fn len(&self) -> usize;

    /// Returns true if the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens a shadow collection that replaces the live one on commit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StagingActive`] if another staged write is open,
    /// or an error if the shadow storage cannot be created.
    fn stage(&self) -> Result<Box<dyn StagedWrite + '_>, StoreError>;

    /// Line numbers with the given log type, ascending.
    fn keys_by_log_type(&self, log_type: &str) -> Vec<LineNumber>;

    /// Line numbers with the given serial number, ascending.
    fn keys_by_serial(&self, serial_number: &str) -> Vec<LineNumber>;

    /// Line numbers whose timestamp lies in `[start, end]`, ascending.
    fn keys_in_time_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<LineNumber>;

    /// Line numbers with `log_type` whose timestamp lies in `[start, end]`.
    fn keys_by_time_and_type(
        &self,
        log_type: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<LineNumber>;
}

/// A shadow collection being filled before it replaces the live records.
///
/// Dropping a staged write without committing discards everything staged.
pub trait StagedWrite {
    /// Adds a batch of records to the shadow collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be staged.
    fn put_batch(&mut self, records: &[LogRecord]) -> Result<(), StoreError>;

    /// Returns the number of distinct records staged so far.
    fn staged_len(&self) -> usize;

    /// Validates the staged count and atomically swaps the shadow collection
    /// in for the live one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CountMismatch`] if the staged count differs from
    /// `expected_len`, or an error if the swap fails. The live collection is
    /// untouched on error.
    fn commit(self: Box<Self>, expected_len: usize) -> Result<(), StoreError>;
}
