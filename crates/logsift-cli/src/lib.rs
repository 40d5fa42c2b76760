//! # logsift-cli
//!
//! Command-line interface over `logsift-core`.
//!
//! Provides commands for:
//! - Ingesting a device log file into a persistent store
//! - Filtered, paginated search
//! - Log type and store summaries
//!
//! The store lives in a directory (`--store`, default `.logsift`) that
//! survives between invocations, so one `ingest` is followed by any number
//! of `query` calls.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, Format, IngestArgs, QueryArgs};
pub use error::CliError;
pub use output::OutputFormat;
