//! Types command implementation.

use std::io::Write;
use std::path::Path;

use logsift_core::{EngineConfig, TypeHistogram};
use serde::Serialize;

use crate::commands::open_session;
use crate::error::CliError;
use crate::output::{OutputFormat, TableDisplay};

/// Handler for the types command.
pub struct TypesCommand<'a> {
    store_dir: &'a Path,
    config: &'a EngineConfig,
}

impl<'a> TypesCommand<'a> {
    /// Creates a new types command handler.
    #[must_use]
    pub const fn new(store_dir: &'a Path, config: &'a EngineConfig) -> Self {
        Self { store_dir, config }
    }

    /// Executes the types command.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened.
    pub async fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
    ) -> Result<(), CliError> {
        let session = open_session(self.store_dir, self.config.clone())?;
        format.write(out, &TypeList::from_histogram(&session.type_histogram()))
    }
}

/// One log type and its record count.
#[derive(Debug, Clone, Serialize)]
pub struct TypeCount {
    /// Log type.
    pub log_type: String,
    /// Records of this type.
    pub count: usize,
}

/// Log types for display, most frequent first.
#[derive(Debug, Clone, Serialize)]
pub struct TypeList {
    /// Types with counts.
    pub types: Vec<TypeCount>,
    /// Total records.
    pub total: usize,
}

impl TypeList {
    /// Builds a list sorted by descending count, then by name.
    #[must_use]
    pub fn from_histogram(histogram: &TypeHistogram) -> Self {
        let mut types: Vec<TypeCount> = histogram
            .iter()
            .map(|(log_type, count)| TypeCount {
                log_type: log_type.clone(),
                count: *count,
            })
            .collect();
        types.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.log_type.cmp(&b.log_type)));

        Self {
            total: types.iter().map(|t| t.count).sum(),
            types,
        }
    }
}

impl TableDisplay for TypeList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.types.is_empty() {
            writeln!(writer, "No records stored")?;
            return Ok(());
        }

        writeln!(writer, "{:<32}  {:>8}", "TYPE", "COUNT")?;
        writeln!(writer, "{}", "─".repeat(42))?;
        for entry in &self.types {
            writeln!(writer, "{:<32}  {:>8}", entry.log_type, entry.count)?;
        }
        writeln!(writer)?;
        writeln!(
            writer,
            "Total: {} record(s), {} type(s)",
            self.total,
            self.types.len()
        )?;
        Ok(())
    }
}
