//! Error types for parsing, storage, ingest and queries.
//!
//! The parser itself never fails: a line without recognizable fields degrades
//! to documented defaults. Everything else surfaces as one of the typed errors
//! below and bubbles to the caller without retries.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a record store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Opening or writing the underlying storage failed.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The persisted table contains an unreadable record.
    #[error("corrupt record at line {line} of {}: {reason}", .path.display())]
    Corrupt {
        /// Table file that failed to load.
        path: PathBuf,
        /// 1-based line within the table file.
        line: usize,
        /// Decoder message.
        reason: String,
    },

    /// A staged write was committed with an unexpected record count.
    #[error("staged record count mismatch: expected {expected}, staged {actual}")]
    CountMismatch {
        /// Count the caller expected.
        expected: usize,
        /// Distinct records actually staged.
        actual: usize,
    },

    /// Another staged write is still open against this store.
    #[error("a staged write is already open")]
    StagingActive,
}

/// Errors raised while ingesting raw log text.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Reading the raw source text failed.
    #[error("failed to read log source: {0}")]
    Io(#[from] std::io::Error),

    /// Writing parsed records failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An ingest is already running against this session or store.
    #[error("an ingest is already running")]
    AlreadyRunning,

    /// The blocking ingest task panicked or was cancelled.
    #[error("ingest task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The source file does not carry the `.log` extension.
    #[error("unsupported file {}: only .log files are accepted", .path.display())]
    UnsupportedFile {
        /// Rejected path.
        path: PathBuf,
    },
}

/// Errors raised while evaluating queries or resolving pages.
///
/// Malformed time-of-day input is not an error: it parses to "no bound".
#[derive(Debug, Error)]
pub enum QueryError {
    /// Reading records from the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Page size was zero.
    #[error("page size must be greater than zero")]
    InvalidPageSize,

    /// Page number was zero.
    #[error("page number must be at least 1, got {0}")]
    InvalidPageNumber(usize),

    /// An in-place ingest is rewriting the store.
    #[error("an in-place ingest is in progress; query after it completes")]
    IngestInProgress,
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A derived pattern failed to compile.
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid JSON.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Umbrella error for callers that drive a whole session.
#[derive(Debug, Error)]
pub enum LogsiftError {
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Ingest failure.
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// Query failure.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type alias, defaulting to [`LogsiftError`].
pub type Result<T, E = LogsiftError> = std::result::Result<T, E>;
