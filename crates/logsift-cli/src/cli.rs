//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// logsift - search and page through device logs.
#[derive(Parser, Debug, Clone)]
#[command(name = "logsift")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the record store.
    #[arg(long, env = "LOGSIFT_STORE", default_value = ".logsift")]
    pub store: PathBuf,

    /// Engine configuration file (JSON).
    #[arg(short, long, env = "LOGSIFT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Parse a log file and replace the stored records with it.
    Ingest(IngestArgs),

    /// Search stored records and print one page of matches.
    Query(QueryArgs),

    /// List log types with their record counts.
    Types,

    /// Show the stored record count, device serial and base date.
    Info,
}

/// Arguments for the ingest command.
#[derive(Parser, Debug, Clone)]
pub struct IngestArgs {
    /// Log file to ingest.
    #[arg(required = true)]
    pub file: PathBuf,

    /// Clear the store first and write chunk by chunk instead of staging.
    #[arg(long)]
    pub in_place: bool,

    /// Accept files without a `.log` extension.
    #[arg(long)]
    pub any_extension: bool,

    /// Lines per write batch.
    #[arg(long)]
    pub batch_size: Option<usize>,
}

/// Arguments for the query command.
#[derive(Parser, Debug, Clone)]
pub struct QueryArgs {
    /// Whitespace-separated words; every word must appear in the content or
    /// the log type.
    #[arg(short, long, default_value = "")]
    pub search: String,

    /// Compare search words case-insensitively.
    #[arg(short = 'i', long)]
    pub ignore_case: bool,

    /// Only show these log types (repeatable).
    #[arg(short = 't', long = "type", value_name = "TYPE")]
    pub types: Vec<String>,

    /// Earliest time of day, HH:MM.
    #[arg(long, value_name = "HH:MM")]
    pub start: Option<String>,

    /// Latest time of day, HH:MM.
    #[arg(long, value_name = "HH:MM")]
    pub end: Option<String>,

    /// Page number, starting at 1.
    #[arg(short, long, default_value_t = 1)]
    pub page: usize,

    /// Records per page.
    #[arg(long)]
    pub page_size: Option<usize>,
}
