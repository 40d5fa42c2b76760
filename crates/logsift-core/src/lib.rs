//! # logsift-core
//!
//! Line parser, record store and query engine for device logs.
//!
//! This crate provides:
//!
//! - [`LineParser`]: Extracts timestamp, serial number, log type and content
//! - [`RecordStore`]: Abstract trait for record backends
//! - [`MemoryRecordStore`]: In-memory record storage
//! - [`FileRecordStore`]: Directory-backed storage with versioned schema
//! - [`QueryEngine`]: Text, log type and time-of-day filtering
//! - [`page`]: Page slicing over a matched key sequence
//! - [`Ingestor`]: Chunked, staged ingest of raw log text
//! - [`LogSession`]: Ingest, query and pagination over one store
//!
//! ## Example
//!
//! ```rust
//! use logsift_core::{EngineConfig, LogSession, QuerySpec};
//!
//! let session = LogSession::in_memory(EngineConfig::default())?;
//! session.ingest("2024-03-14T12:34:56.789Z alexa35-AB12 kernel: boot complete\napp: idle")?;
//!
//! let outcome = session.query(&QuerySpec::new().with_search("boot"))?;
//! assert_eq!(outcome.matched_line_numbers, vec![1]);
//!
//! let page = session.page(&outcome.matched_line_numbers, 300, 1)?;
//! assert_eq!(page.records[0].log_type, "kernel");
//! # Ok::<(), logsift_core::LogsiftError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod file_store;
pub mod index;
pub mod ingest;
pub mod paginate;
pub mod parser;
pub mod query;
pub mod session;
pub mod store;
pub mod traits;
pub mod types;

// Re-export main types
pub use config::{EngineConfig, IngestMode};
pub use error::{ConfigError, IngestError, LogsiftError, QueryError, Result, StoreError};
pub use file_store::{FileRecordStore, FileRecordStoreConfig, SCHEMA_VERSION};
pub use index::RecordIndex;
pub use ingest::{split_lines, IngestProgress, IngestSummary, Ingestor, PreparedIngest};
pub use paginate::{clamp_page, page, total_pages, Page};
pub use parser::{LineParser, ParsedLine};
pub use query::{base_date, session_info, type_histogram, QueryEngine, QueryOutcome};
pub use session::LogSession;
pub use store::{shared_memory_store, MemoryRecordStore, SharedRecordStore};
pub use traits::{RecordStore, StagedWrite};
pub use types::{
    LineNumber, LogRecord, QuerySpec, SessionInfo, TimeOfDayRange, TimestampOrigin, TypeHistogram,
};
