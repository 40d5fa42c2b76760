//! Filter evaluation over a full record set.
//!
//! This module provides:
//! - [`QueryEngine`]: Evaluates a [`QuerySpec`] against every record
//! - [`QueryOutcome`]: Matched keys plus whole-set derived data
//! - [`type_histogram`], [`session_info`], [`base_date`]: Whole-set derivations
//!
//! Every query is a full scan: all predicates are re-evaluated for every
//! record, O(n) per call. At tens of thousands of records this stays within
//! interactive latency, so the secondary indexes are only used for direct
//! store lookups and never consulted here.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{midnight_of, LineNumber, LogRecord, QuerySpec, SessionInfo, TypeHistogram};

/// Result of evaluating a [`QuerySpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOutcome {
    /// Matching line numbers, ascending
    pub matched_line_numbers: Vec<LineNumber>,
    /// Record count per log type over the whole set, ignoring the filter
    pub type_histogram: TypeHistogram,
    /// Midnight anchor for time-of-day inputs, if any record carries a serial
    pub base_date: Option<DateTime<Utc>>,
    /// Human-readable summary line
    pub status: String,
}

impl QueryOutcome {
    /// Number of matching records.
    #[must_use]
    pub fn total_matches(&self) -> usize {
        self.matched_line_numbers.len()
    }
}

/// Stateless filter evaluator.
#[derive(Debug, Clone, Copy)]
pub struct QueryEngine {
    offset: FixedOffset,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new(FixedOffset::east_opt(0).unwrap_or_else(|| unreachable!()))
    }
}

impl QueryEngine {
    /// Creates an engine projecting timestamps into `offset` local time.
    #[must_use]
    pub const fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Returns the local offset used for time-of-day projection.
    #[must_use]
    pub const fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Evaluates `spec` and derives the whole-set histogram and base date.
    #[must_use]
    pub fn query(&self, records: &[LogRecord], spec: &QuerySpec) -> QueryOutcome {
        let matched_line_numbers = self.matching_line_numbers(records, spec);
        QueryOutcome {
            status: status_line(matched_line_numbers.len(), spec),
            type_histogram: type_histogram(records),
            base_date: base_date(records, self.offset),
            matched_line_numbers,
        }
    }

    /// Returns the line numbers of records matching `spec`, ascending.
    #[must_use]
    pub fn matching_line_numbers(
        &self,
        records: &[LogRecord],
        spec: &QuerySpec,
    ) -> Vec<LineNumber> {
        let text = TextMatcher::new(spec);

        let mut keys: Vec<LineNumber> = records
            .iter()
            .filter(|record| {
                text.matches(record)
                    && type_allowed(record, spec)
                    && self.time_allowed(record, spec)
            })
            .map(|record| record.line_number)
            .collect();

        keys.sort_unstable();
        keys
    }

    fn time_allowed(&self, record: &LogRecord, spec: &QuerySpec) -> bool {
        spec.time_range.is_unbounded()
            || spec.time_range.contains(record.minute_of_day(self.offset))
    }
}

/// Per-word substring matcher over `content` and `log_type`.
struct TextMatcher {
    words: Vec<String>,
    case_sensitive: bool,
}

impl TextMatcher {
    fn new(spec: &QuerySpec) -> Self {
        let words = spec
            .search_words()
            .into_iter()
            .map(|word| {
                if spec.case_sensitive {
                    word.to_string()
                } else {
                    word.to_lowercase()
                }
            })
            .collect();
        Self {
            words,
            case_sensitive: spec.case_sensitive,
        }
    }

    fn matches(&self, record: &LogRecord) -> bool {
        if self.words.is_empty() {
            return true;
        }

        if self.case_sensitive {
            return self.words.iter().all(|word| {
                record.content.contains(word.as_str()) || record.log_type.contains(word.as_str())
            });
        }

        let content = record.content.to_lowercase();
        let log_type = record.log_type.to_lowercase();
        self.words
            .iter()
            .all(|word| content.contains(word.as_str()) || log_type.contains(word.as_str()))
    }
}

fn type_allowed(record: &LogRecord, spec: &QuerySpec) -> bool {
    spec.allowed_log_types.is_empty() || spec.allowed_log_types.contains(&record.log_type)
}

/// Counts records per log type across the whole set.
#[must_use]
pub fn type_histogram(records: &[LogRecord]) -> TypeHistogram {
    let mut histogram = TypeHistogram::new();
    for record in records {
        *histogram.entry(record.log_type.clone()).or_default() += 1;
    }
    histogram
}

/// Serial number and base date of the lowest-numbered record carrying a serial.
#[must_use]
pub fn session_info(records: &[LogRecord], offset: FixedOffset) -> Option<SessionInfo> {
    records
        .iter()
        .filter(|record| record.has_serial_number())
        .min_by_key(|record| record.line_number)
        .map(|record| SessionInfo {
            serial_number: record.serial_number.clone(),
            base_date: midnight_of(record.timestamp, offset),
        })
}

/// Local midnight of the first record that carries a serial number.
#[must_use]
pub fn base_date(records: &[LogRecord], offset: FixedOffset) -> Option<DateTime<Utc>> {
    session_info(records, offset).map(|info| info.base_date)
}

/// Summary line shown above a result list.
#[must_use]
pub fn status_line(total_matches: usize, spec: &QuerySpec) -> String {
    if spec.search_text.trim().is_empty() {
        format!("Total {total_matches} records")
    } else if spec.case_sensitive {
        format!("Found {total_matches} matching records (case-sensitive)")
    } else {
        format!("Found {total_matches} matching records")
    }
}
