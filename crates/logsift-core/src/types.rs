//! Core types shared by the parser, store and query engine.
//!
//! This module provides:
//! - [`LogRecord`]: One parsed log line, keyed by its line number
//! - [`TimestampOrigin`]: Which strategy produced a record's timestamp
//! - [`TimeOfDayRange`]: Minutes-since-midnight filter bounds
//! - [`QuerySpec`]: Filter specification for a single query
//! - [`SessionInfo`]: Device serial and base date derived from an ingest

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// 1-based position of a line in the ingested file; primary key of a record.
pub type LineNumber = u64;

/// Count of records per log type, over the whole record set.
pub type TypeHistogram = BTreeMap<String, usize>;

/// Log type assigned when no type token is found.
pub const UNKNOWN_LOG_TYPE: &str = "unknown";

/// Minutes in a day; valid minute-of-day values are `0..MINUTES_PER_DAY`.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// One parsed log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Original line position, starting at 1
    pub line_number: LineNumber,
    /// Parsed instant, or the ingest clock when none was found
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Originating device serial number (empty when absent)
    #[serde(default)]
    pub serial_number: String,
    /// Type token such as `kernel` or `concern[371]`
    pub log_type: String,
    /// Line with extracted fields stripped and whitespace collapsed
    #[serde(default)]
    pub content: String,
}

impl LogRecord {
    /// Returns true if a serial number was extracted for this line.
    #[must_use]
    pub fn has_serial_number(&self) -> bool {
        !self.serial_number.is_empty()
    }

    /// Projects the timestamp onto minutes since midnight in `offset`.
    #[must_use]
    pub fn minute_of_day(&self, offset: FixedOffset) -> u32 {
        let local = self.timestamp.with_timezone(&offset);
        local.hour() * 60 + local.minute()
    }
}

/// Which extraction strategy produced a record's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampOrigin {
    /// `2024-03-14T12:34:56.789Z`
    Iso8601,
    /// `[14/Mar/2024:12:34:56 +0000]`
    CommonLog,
    /// `2024-03-14 12:34:56`, read in the configured local offset
    Plain,
    /// Bare 10-digit epoch seconds
    UnixEpoch,
    /// Nothing matched; the ingest clock was used
    IngestClock,
}

impl TimestampOrigin {
    /// Returns true if the timestamp was taken from the line itself.
    #[must_use]
    pub const fn is_from_line(self) -> bool {
        !matches!(self, Self::IngestClock)
    }

    /// Returns the string representation of this origin.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Iso8601 => "iso8601",
            Self::CommonLog => "common_log",
            Self::Plain => "plain",
            Self::UnixEpoch => "unix_epoch",
            Self::IngestClock => "ingest_clock",
        }
    }
}

/// Time-of-day filter bounds in minutes since midnight.
///
/// Both bounds are inclusive. The projection discards the date, so a range
/// selects the same window on every day present in the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDayRange {
    /// Lower bound (inclusive)
    pub start: Option<u32>,
    /// Upper bound (inclusive)
    pub end: Option<u32>,
}

impl TimeOfDayRange {
    /// Creates a range with the given bounds.
    #[must_use]
    pub const fn new(start: Option<u32>, end: Option<u32>) -> Self {
        Self { start, end }
    }

    /// Creates a range with both bounds set.
    #[must_use]
    pub const fn between(start: u32, end: u32) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Parses `HH:MM` inputs; an empty or malformed side yields no bound.
    #[must_use]
    pub fn parse(start: &str, end: &str) -> Self {
        Self {
            start: parse_time_of_day(start),
            end: parse_time_of_day(end),
        }
    }

    /// Returns true if neither bound is set.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Checks if a minute-of-day value falls within this range.
    #[must_use]
    pub fn contains(&self, minute_of_day: u32) -> bool {
        if let Some(start) = self.start {
            if minute_of_day < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if minute_of_day > end {
                return false;
            }
        }
        true
    }

    /// Anchors the bounds to `base_date`, yielding absolute instants.
    #[must_use]
    pub fn to_absolute(
        &self,
        base_date: DateTime<Utc>,
    ) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let anchor = |minutes: u32| base_date + Duration::minutes(i64::from(minutes));
        (self.start.map(anchor), self.end.map(anchor))
    }
}

/// Parses `HH:MM` (or `HH:MM:SS`, seconds ignored) into minutes since midnight.
///
/// Returns `None` for empty or malformed input, which callers treat as "no
/// bound" rather than an error.
#[must_use]
pub fn parse_time_of_day(input: &str) -> Option<u32> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut parts = trimmed.split(':');
    let hours: u32 = parts.next()?.parse().ok()?;
    let minutes: u32 = parts.next()?.parse().ok()?;
    if let Some(seconds) = parts.next() {
        let seconds: u32 = seconds.parse().ok()?;
        if seconds > 59 {
            return None;
        }
    }
    if parts.next().is_some() || hours > 23 || minutes > 59 {
        return None;
    }

    Some(hours * 60 + minutes)
}

/// Filter specification for a single query.
///
/// The three predicates (text, log type, time of day) are combined by AND.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Whitespace-separated search words; blank means no text filter
    #[serde(default)]
    pub search_text: String,
    /// Whether the text filter compares case-sensitively
    #[serde(default = "default_case_sensitive")]
    pub case_sensitive: bool,
    /// Allowed log types (empty means all types)
    #[serde(default)]
    pub allowed_log_types: BTreeSet<String>,
    /// Time-of-day bounds
    #[serde(default)]
    pub time_range: TimeOfDayRange,
}

const fn default_case_sensitive() -> bool {
    true
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            search_text: String::new(),
            case_sensitive: default_case_sensitive(),
            allowed_log_types: BTreeSet::new(),
            time_range: TimeOfDayRange::default(),
        }
    }
}

impl QuerySpec {
    /// Creates a spec that matches every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the search text.
    #[must_use]
    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        self.search_text = text.into();
        self
    }

    /// Sets case sensitivity of the text filter.
    #[must_use]
    pub const fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Adds an allowed log type.
    #[must_use]
    pub fn with_log_type(mut self, log_type: impl Into<String>) -> Self {
        self.allowed_log_types.insert(log_type.into());
        self
    }

    /// Sets the time-of-day range.
    #[must_use]
    pub const fn with_time_range(mut self, time_range: TimeOfDayRange) -> Self {
        self.time_range = time_range;
        self
    }

    /// Returns the search words, or an empty list for blank search text.
    #[must_use]
    pub fn search_words(&self) -> Vec<&str> {
        self.search_text.split_whitespace().collect()
    }

    /// Returns true if this spec applies no filter at all.
    #[must_use]
    pub fn is_unfiltered(&self) -> bool {
        self.search_text.trim().is_empty()
            && self.allowed_log_types.is_empty()
            && self.time_range.is_unbounded()
    }
}

/// Device serial and base date derived from the current record set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Serial number of the first record that carries one
    pub serial_number: String,
    /// Local midnight of that record's timestamp
    pub base_date: DateTime<Utc>,
}

/// Returns local midnight (in `offset`) of the day containing `timestamp`.
#[must_use]
pub fn midnight_of(timestamp: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    timestamp
        .with_timezone(&offset)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|local_midnight| offset.from_local_datetime(&local_midnight).single())
        .map_or(timestamp, |dt| dt.with_timezone(&Utc))
}
