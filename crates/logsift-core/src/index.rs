//! Secondary lookup paths over stored records.
//!
//! This module provides:
//! - [`RecordIndex`]: Indexes by timestamp, serial number, log type, and
//!   the composite `(timestamp, log type)`
//!
//! Every lookup returns line numbers in ascending order. Time bounds are
//! inclusive on both ends.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use chrono::{DateTime, Utc};

use crate::types::{LineNumber, LogRecord};

/// Multi-dimensional index for records keyed by line number.
///
/// Maintains indices for:
/// - Timestamp (epoch ms) → line numbers
/// - Serial number → line numbers
/// - Log type → line numbers
/// - (Timestamp, log type) → line numbers
#[derive(Debug, Default, Clone)]
pub struct RecordIndex {
    by_timestamp: BTreeMap<i64, Vec<LineNumber>>,
    by_serial: HashMap<String, Vec<LineNumber>>,
    by_log_type: HashMap<String, Vec<LineNumber>>,
    by_time_and_type: BTreeMap<(i64, String), Vec<LineNumber>>,
}

impl RecordIndex {
    /// Creates a new empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index over `records`.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a LogRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            index.insert(record);
        }
        index
    }

    /// Indexes a record.
    pub fn insert(&mut self, record: &LogRecord) {
        let millis = record.timestamp.timestamp_millis();
        let key = record.line_number;

        self.by_timestamp.entry(millis).or_default().push(key);
        self.by_serial
            .entry(record.serial_number.clone())
            .or_default()
            .push(key);
        self.by_log_type
            .entry(record.log_type.clone())
            .or_default()
            .push(key);
        self.by_time_and_type
            .entry((millis, record.log_type.clone()))
            .or_default()
            .push(key);
    }

    /// Removes a record from all indices.
    pub fn remove(&mut self, record: &LogRecord) {
        let millis = record.timestamp.timestamp_millis();
        let key = record.line_number;

        if let Some(keys) = self.by_timestamp.get_mut(&millis) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.by_timestamp.remove(&millis);
            }
        }

        if let Some(keys) = self.by_serial.get_mut(&record.serial_number) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.by_serial.remove(&record.serial_number);
            }
        }

        if let Some(keys) = self.by_log_type.get_mut(&record.log_type) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.by_log_type.remove(&record.log_type);
            }
        }

        let composite = (millis, record.log_type.clone());
        if let Some(keys) = self.by_time_and_type.get_mut(&composite) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.by_time_and_type.remove(&composite);
            }
        }
    }

    /// Clears all indices.
    pub fn clear(&mut self) {
        self.by_timestamp.clear();
        self.by_serial.clear();
        self.by_log_type.clear();
        self.by_time_and_type.clear();
    }

    /// Gets all line numbers with the given log type.
    #[must_use]
    pub fn by_log_type(&self, log_type: &str) -> Vec<LineNumber> {
        sorted(self.by_log_type.get(log_type).cloned().unwrap_or_default())
    }

    /// Gets all line numbers with the given serial number.
    #[must_use]
    pub fn by_serial(&self, serial_number: &str) -> Vec<LineNumber> {
        sorted(self.by_serial.get(serial_number).cloned().unwrap_or_default())
    }

    /// Gets line numbers whose timestamp lies in `[start, end]`.
    #[must_use]
    pub fn in_time_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<LineNumber> {
        let Some((lower, upper)) = millis_bounds(start, end) else {
            return Vec::new();
        };
        sorted(
            self.by_timestamp
                .range((lower, upper))
                .flat_map(|(_, keys)| keys.iter().copied())
                .collect(),
        )
    }

    /// Gets line numbers with `log_type` whose timestamp lies in `[start, end]`.
    #[must_use]
    pub fn by_time_and_type(
        &self,
        log_type: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<LineNumber> {
        let Some((lower, upper)) = millis_bounds(start, end) else {
            return Vec::new();
        };
        let lower = match lower {
            Bound::Included(millis) => Bound::Included((millis, String::new())),
            _ => Bound::Unbounded,
        };

        sorted(
            self.by_time_and_type
                .range((lower, Bound::Unbounded))
                .take_while(|((millis, _), _)| match upper {
                    Bound::Included(end) => *millis <= end,
                    _ => true,
                })
                .filter(|((_, ty), _)| ty == log_type)
                .flat_map(|(_, keys)| keys.iter().copied())
                .collect(),
        )
    }
}

fn sorted(mut keys: Vec<LineNumber>) -> Vec<LineNumber> {
    keys.sort_unstable();
    keys
}

/// Converts optional instants to inclusive millisecond bounds, or `None` if
/// the range is empty.
fn millis_bounds(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Option<(Bound<i64>, Bound<i64>)> {
    let lower = start.map(|t| t.timestamp_millis());
    let upper = end.map(|t| t.timestamp_millis());
    if let (Some(lo), Some(hi)) = (lower, upper) {
        if lo > hi {
            return None;
        }
    }
    Some((
        lower.map_or(Bound::Unbounded, Bound::Included),
        upper.map_or(Bound::Unbounded, Bound::Included),
    ))
}
