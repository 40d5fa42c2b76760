//! CLI command implementations.
//!
//! Each submodule implements a specific CLI command:
//! - [`ingest`] - Parse a log file into the store
//! - [`query`] - Filtered, paginated search
//! - [`types`] - Log type histogram
//! - [`info`] - Store and session summary

pub mod info;
pub mod ingest;
pub mod query;
pub mod types;

pub use info::InfoCommand;
pub use ingest::IngestCommand;
pub use query::QueryCommand;
pub use types::TypesCommand;

use std::path::Path;
use std::sync::Arc;

use logsift_core::{EngineConfig, FileRecordStore, LogSession};
use tracing::debug;

use crate::error::CliError;

/// Loads the engine configuration, falling back to defaults without a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds invalid values.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, CliError> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading engine config");
            Ok(EngineConfig::from_json_file(path)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

/// Opens a session over the file store in `store_dir`.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or `config` is invalid.
pub fn open_session(store_dir: &Path, config: EngineConfig) -> Result<LogSession, CliError> {
    let store = FileRecordStore::with_base_dir(store_dir)?;
    Ok(LogSession::open(Arc::new(store), config)?)
}
