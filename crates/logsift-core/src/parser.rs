//! Line parsing into [`LogRecord`]s.
//!
//! This module provides:
//! - [`LineParser`]: Total parser from a raw line to a structured record
//! - [`TimestampPattern`]: Ordered timestamp extraction strategies
//! - Serial number, leading number and log type extraction
//!
//! Parsing never fails. Each stage is first-match-wins over an ordered list
//! of patterns; a stage that finds nothing falls back to its documented
//! default (ingest clock, empty serial number, `"unknown"` log type).

use std::ops::Range;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::types::{LineNumber, LogRecord, TimestampOrigin, UNKNOWN_LOG_TYPE};

/// Converts a pattern match into an instant; `offset` is the local offset.
type Extractor = fn(&Captures<'_>, FixedOffset) -> Option<DateTime<Utc>>;

/// One timestamp extraction strategy.
pub struct TimestampPattern {
    origin: TimestampOrigin,
    regex: Regex,
    extract: Extractor,
}

impl TimestampPattern {
    fn new(origin: TimestampOrigin, pattern: &str, extract: Extractor) -> Self {
        Self {
            origin,
            regex: Regex::new(pattern).unwrap_or_else(|_| unreachable!()),
            extract,
        }
    }

    /// Returns the origin this pattern reports.
    #[must_use]
    pub const fn origin(&self) -> TimestampOrigin {
        self.origin
    }

    /// Finds the first occurrence of this pattern that converts to an instant.
    #[must_use]
    pub fn find(&self, line: &str, offset: FixedOffset) -> Option<TimestampMatch> {
        self.regex.captures_iter(line).find_map(|caps| {
            let whole = caps.get(0)?;
            let timestamp = (self.extract)(&caps, offset)?;
            Some(TimestampMatch {
                origin: self.origin,
                timestamp,
                span: whole.range(),
            })
        })
    }
}

/// Timestamp strategies in priority order.
static TIMESTAMP_PATTERNS: Lazy<Vec<TimestampPattern>> = Lazy::new(|| {
    vec![
        TimestampPattern::new(
            TimestampOrigin::Iso8601,
            r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}Z",
            extract_iso8601,
        ),
        TimestampPattern::new(
            TimestampOrigin::CommonLog,
            r"\[(\d{2}/[A-Za-z]{3}/\d{4}:\d{2}:\d{2}:\d{2} [-+]\d{4})\]",
            extract_common_log,
        ),
        TimestampPattern::new(
            TimestampOrigin::Plain,
            r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}",
            extract_plain,
        ),
        TimestampPattern::new(TimestampOrigin::UnixEpoch, r"\b\d{10}\b", extract_unix_epoch),
    ]
});

/// Signed or unsigned decimal number at the start of the content.
static LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[-+]?\d*\.?\d+\s*").unwrap_or_else(|_| unreachable!()));

/// `identifier:` or `identifier[digits]:` followed by whitespace or end of line.
static LOG_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*(?:\[\d+\])?):(?:\s+|$)")
        .unwrap_or_else(|_| unreachable!())
});

/// Returns the timestamp strategies in the order they are tried.
#[must_use]
pub fn timestamp_patterns() -> &'static [TimestampPattern] {
    &TIMESTAMP_PATTERNS
}

fn extract_iso8601(caps: &Captures<'_>, _offset: FixedOffset) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(caps.get(0)?.as_str(), "%Y-%m-%dT%H:%M:%S%.3fZ")
        .ok()
        .map(|naive| naive.and_utc())
}

fn extract_common_log(caps: &Captures<'_>, _offset: FixedOffset) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(caps.get(1)?.as_str(), "%d/%b/%Y:%H:%M:%S %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn extract_plain(caps: &Captures<'_>, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(caps.get(0)?.as_str(), "%Y-%m-%d %H:%M:%S").ok()?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn extract_unix_epoch(caps: &Captures<'_>, _offset: FixedOffset) -> Option<DateTime<Utc>> {
    let seconds: i64 = caps.get(0)?.as_str().parse().ok()?;
    DateTime::from_timestamp(seconds, 0)
}

/// A timestamp found in a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampMatch {
    /// Strategy that matched.
    pub origin: TimestampOrigin,
    /// Parsed instant.
    pub timestamp: DateTime<Utc>,
    /// Byte span of the match in the original line.
    pub span: Range<usize>,
}

/// A serial number found in a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialMatch {
    /// The alphanumeric token after the device prefix.
    pub serial_number: String,
    /// Byte span of the whole match (prefix included) in the original line.
    pub span: Range<usize>,
}

/// A parsed line together with how its timestamp was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    /// The structured record.
    pub record: LogRecord,
    /// Strategy that produced `record.timestamp`.
    pub timestamp_origin: TimestampOrigin,
}

impl ParsedLine {
    /// Returns true if no timestamp was found and the ingest clock was used.
    #[must_use]
    pub const fn used_ingest_clock(&self) -> bool {
        !self.timestamp_origin.is_from_line()
    }
}

/// Parser for device log lines.
#[derive(Debug, Clone)]
pub struct LineParser {
    /// Serial number patterns in priority order.
    serial_patterns: Vec<Regex>,
    /// Local offset for plain timestamps.
    offset: FixedOffset,
}

impl LineParser {
    /// Creates a parser for serial numbers introduced by `device_prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if a serial pattern fails to compile.
    pub fn new(device_prefix: &str, offset: FixedOffset) -> Result<Self, ConfigError> {
        let prefix = regex::escape(device_prefix);
        let serial_patterns = [
            format!(r"(?i){prefix}-([A-Za-z0-9]+)"),
            format!(r"(?i){prefix}[_ ]([A-Za-z0-9]+)"),
            format!(r"(?i){prefix}:\s*([A-Za-z0-9]+)"),
        ]
        .iter()
        .map(|pattern| Regex::new(pattern))
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            serial_patterns,
            offset,
        })
    }

    /// Creates a parser from engine configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured offset or prefix is unusable.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Self::new(&config.device_prefix, config.utc_offset()?)
    }

    /// Returns the local offset used for plain timestamps.
    #[must_use]
    pub const fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Parses a line into a record.
    ///
    /// For a fixed `ingest_clock`, identical input always yields an identical
    /// record.
    #[must_use]
    pub fn parse(
        &self,
        line: &str,
        line_number: LineNumber,
        ingest_clock: DateTime<Utc>,
    ) -> LogRecord {
        self.parse_detailed(line, line_number, ingest_clock).record
    }

    /// Parses a line, also reporting which timestamp strategy applied.
    #[must_use]
    pub fn parse_detailed(
        &self,
        line: &str,
        line_number: LineNumber,
        ingest_clock: DateTime<Utc>,
    ) -> ParsedLine {
        let mut spans = Vec::with_capacity(2);

        let (timestamp, timestamp_origin) = match self.find_timestamp(line) {
            Some(found) => {
                spans.push(found.span);
                (found.timestamp, found.origin)
            }
            None => (ingest_clock, TimestampOrigin::IngestClock),
        };

        let serial_number = match self.find_serial(line) {
            Some(found) => {
                spans.push(found.span);
                found.serial_number
            }
            None => String::new(),
        };

        let (log_type, content) = clean_content(&remove_spans(line, &mut spans));

        ParsedLine {
            record: LogRecord {
                line_number,
                timestamp,
                serial_number,
                log_type,
                content,
            },
            timestamp_origin,
        }
    }

    /// Finds the highest-priority timestamp in `line`.
    #[must_use]
    pub fn find_timestamp(&self, line: &str) -> Option<TimestampMatch> {
        timestamp_patterns()
            .iter()
            .find_map(|pattern| pattern.find(line, self.offset))
    }

    /// Finds the highest-priority serial number in `line`.
    #[must_use]
    pub fn find_serial(&self, line: &str) -> Option<SerialMatch> {
        self.serial_patterns.iter().find_map(|pattern| {
            let caps = pattern.captures(line)?;
            Some(SerialMatch {
                serial_number: caps.get(1)?.as_str().to_string(),
                span: caps.get(0)?.range(),
            })
        })
    }
}

/// Removes byte spans from `line`; overlapping spans are merged.
fn remove_spans(line: &str, spans: &mut [Range<usize>]) -> String {
    spans.sort_by_key(|span| span.start);

    let mut kept = String::with_capacity(line.len());
    let mut cursor = 0;
    for span in spans.iter() {
        if span.start > cursor {
            kept.push_str(&line[cursor..span.start]);
        }
        cursor = cursor.max(span.end);
    }
    if cursor < line.len() {
        kept.push_str(&line[cursor..]);
    }
    kept
}

/// Strips a leading number, extracts the type token and collapses whitespace.
fn clean_content(remaining: &str) -> (String, String) {
    let without_number = LEADING_NUMBER
        .find(remaining)
        .map_or(remaining, |m| &remaining[m.end()..]);

    let (log_type, rest) = LOG_TYPE
        .captures(without_number)
        .and_then(|caps| {
            let token = caps.get(1)?.as_str();
            let whole = caps.get(0)?;
            Some((token.to_string(), &without_number[whole.end()..]))
        })
        .unwrap_or_else(|| (UNKNOWN_LOG_TYPE.to_string(), without_number));

    (log_type, collapse_whitespace(rest))
}

/// Collapses whitespace runs to single spaces and trims both ends.
#[must_use]
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
