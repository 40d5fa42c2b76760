//! CLI error types.

use std::fmt;

use logsift_core::{ConfigError, IngestError, LogsiftError, QueryError, StoreError};

/// Errors surfaced by `logsift` commands.
#[derive(Debug)]
pub enum CliError {
    /// Invalid configuration.
    Config(String),
    /// Parsing, storage, ingest or query failure.
    Engine(LogsiftError),
    /// Output formatting error.
    Format(String),
    /// Invalid argument.
    InvalidArgument(String),
    /// IO error.
    Io(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Engine(e) => write!(f, "{e}"),
            Self::Format(msg) => write!(f, "format error: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Engine(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<LogsiftError> for CliError {
    fn from(err: LogsiftError) -> Self {
        match err {
            LogsiftError::Config(e) => Self::Config(e.to_string()),
            other => Self::Engine(other),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<StoreError> for CliError {
    fn from(err: StoreError) -> Self {
        Self::Engine(err.into())
    }
}

impl From<IngestError> for CliError {
    fn from(err: IngestError) -> Self {
        Self::Engine(err.into())
    }
}

impl From<QueryError> for CliError {
    fn from(err: QueryError) -> Self {
        Self::Engine(err.into())
    }
}
