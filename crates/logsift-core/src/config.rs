//! Engine configuration.

use std::path::Path;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Device prefix that introduces serial numbers, e.g. `alexa35-AB12`.
pub const DEFAULT_DEVICE_PREFIX: &str = "alexa35";

/// Records parsed and written per chunk during ingest.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Records per page.
pub const DEFAULT_PAGE_SIZE: usize = 300;

/// How an ingest replaces the previous record set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Write into a shadow collection and swap it in after a count check.
    /// A failed ingest leaves the previous records untouched.
    #[default]
    Staged,
    /// Clear the live collection, then write chunk by chunk. Chunks
    /// committed before a failure remain in the store.
    InPlace,
}

/// Configuration shared by the parser, ingest pipeline and paginator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix that introduces a device serial number.
    pub device_prefix: String,
    /// Lines per ingest chunk.
    pub batch_size: usize,
    /// Default records per page.
    pub page_size: usize,
    /// Offset east of UTC, in minutes, used as "local time" for plain
    /// timestamps, time-of-day projection and the base date.
    pub utc_offset_minutes: i32,
    /// Replacement strategy for ingests.
    pub ingest_mode: IngestMode,
    /// Whether file ingests require a `.log` extension.
    pub require_log_extension: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_prefix: DEFAULT_DEVICE_PREFIX.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            utc_offset_minutes: 0,
            ingest_mode: IngestMode::default(),
            require_log_extension: true,
        }
    }
}

impl EngineConfig {
    /// Creates a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a config from a JSON file; missing fields take default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the device prefix.
    #[must_use]
    pub fn with_device_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.device_prefix = prefix.into();
        self
    }

    /// Sets the ingest chunk size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the default page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the local UTC offset in minutes.
    #[must_use]
    pub const fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    /// Sets the ingest mode.
    #[must_use]
    pub const fn with_ingest_mode(mut self, mode: IngestMode) -> Self {
        self.ingest_mode = mode;
        self
    }

    /// Sets whether file ingests require a `.log` extension.
    #[must_use]
    pub const fn with_require_log_extension(mut self, require: bool) -> Self {
        self.require_log_extension = require;
        self
    }

    /// Returns the configured offset as a [`FixedOffset`].
    ///
    /// # Errors
    ///
    /// Returns an error if the offset is a day or more away from UTC.
    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }

    /// Checks every value is usable.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range value found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_prefix.is_empty() {
            return Err(ConfigError::Invalid("device_prefix must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be greater than zero".into()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be greater than zero".into()));
        }
        self.utc_offset()?;
        Ok(())
    }
}
