//! Query command implementation.
//!
//! Evaluates a filter over the stored records and prints one page.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, FixedOffset, Utc};
use logsift_core::{
    clamp_page, total_pages, EngineConfig, LogRecord, QuerySpec, TimeOfDayRange,
};
use serde::Serialize;

use crate::cli::QueryArgs;
use crate::commands::open_session;
use crate::error::CliError;
use crate::output::{time_of_day, truncate, OutputFormat, TableDisplay};

/// Handler for the query command.
pub struct QueryCommand<'a> {
    store_dir: &'a Path,
    config: &'a EngineConfig,
}

impl<'a> QueryCommand<'a> {
    /// Creates a new query command handler.
    #[must_use]
    pub const fn new(store_dir: &'a Path, config: &'a EngineConfig) -> Self {
        Self { store_dir, config }
    }

    /// Executes the query command.
    ///
    /// # Errors
    ///
    /// Returns error if the arguments are invalid or the store cannot be read.
    pub async fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        args: &QueryArgs,
    ) -> Result<(), CliError> {
        let page_size = args.page_size.unwrap_or(self.config.page_size);
        if page_size == 0 {
            return Err(CliError::InvalidArgument(
                "page size must be greater than zero".into(),
            ));
        }

        let offset = self.config.utc_offset()?;
        let session = open_session(self.store_dir, self.config.clone())?;

        let spec = build_spec(args);
        let outcome = session.query(&spec)?;

        let pages = total_pages(outcome.total_matches(), page_size);
        let page = session.page(
            &outcome.matched_line_numbers,
            page_size,
            clamp_page(args.page, pages),
        )?;

        let report = QueryReport {
            window: describe_window(&spec.time_range, outcome.base_date, offset),
            has_previous: page.has_previous(),
            has_next: page.has_next(),
            status: outcome.status,
            page_number: page.page_number,
            total_pages: page.total_pages,
            page_size,
            total_matches: page.total_matches,
            records: page.records,
            offset,
        };

        format.write(out, &report)
    }
}

/// Builds a query spec from command-line arguments.
#[must_use]
pub fn build_spec(args: &QueryArgs) -> QuerySpec {
    let time_range = TimeOfDayRange::parse(
        args.start.as_deref().unwrap_or_default(),
        args.end.as_deref().unwrap_or_default(),
    );

    args.types.iter().fold(
        QuerySpec::new()
            .with_search(args.search.clone())
            .case_sensitive(!args.ignore_case)
            .with_time_range(time_range),
        |spec, log_type| spec.with_log_type(log_type.clone()),
    )
}

/// Renders the time filter as local instants on the base date.
///
/// `None` when the filter is unbounded or no base date is known.
#[must_use]
pub fn describe_window(
    range: &TimeOfDayRange,
    base_date: Option<DateTime<Utc>>,
    offset: FixedOffset,
) -> Option<String> {
    let local = |t: DateTime<Utc>| t.with_timezone(&offset).format("%Y-%m-%d %H:%M").to_string();
    match range.to_absolute(base_date?) {
        (Some(start), Some(end)) => Some(format!("{} to {}", local(start), local(end))),
        (Some(start), None) => Some(format!("from {}", local(start))),
        (None, Some(end)) => Some(format!("until {}", local(end))),
        (None, None) => None,
    }
}

/// One page of query results for display.
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    /// Summary line.
    pub status: String,
    /// Page shown.
    pub page_number: usize,
    /// Total pages.
    pub total_pages: usize,
    /// Records per page.
    pub page_size: usize,
    /// Total matching records.
    pub total_matches: usize,
    /// Time filter anchored on the base date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    /// An earlier page exists.
    pub has_previous: bool,
    /// A later page exists.
    pub has_next: bool,
    /// Records on this page.
    pub records: Vec<LogRecord>,
    /// Local offset for displayed times.
    #[serde(skip)]
    pub offset: FixedOffset,
}

impl TableDisplay for QueryReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{}", self.status)?;
        writeln!(
            writer,
            "Page {} of {} ({} per page)",
            self.page_number, self.total_pages, self.page_size
        )?;
        if let Some(window) = &self.window {
            writeln!(writer, "Time window: {window} (same hours on every date)")?;
        }

        if self.records.is_empty() {
            writeln!(writer)?;
            writeln!(writer, "No matching records")?;
            return Ok(());
        }

        writeln!(writer, "{}", "─".repeat(80))?;
        for record in &self.records {
            writeln!(
                writer,
                "#{:<7} {}  {:<16}  {}",
                record.line_number,
                time_of_day(record.timestamp, self.offset),
                truncate(&record.log_type, 16),
                record.content
            )?;
        }

        let mut nav = Vec::new();
        if self.has_previous {
            nav.push(format!("previous: --page {}", self.page_number - 1));
        }
        if self.has_next {
            nav.push(format!("next: --page {}", self.page_number + 1));
        }
        if !nav.is_empty() {
            writeln!(writer)?;
            writeln!(writer, "{}", nav.join("   "))?;
        }
        Ok(())
    }
}
