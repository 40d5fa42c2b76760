//! Info command implementation.

use std::io::Write;
use std::path::Path;

use logsift_core::{EngineConfig, SCHEMA_VERSION};
use serde::Serialize;

use crate::commands::open_session;
use crate::error::CliError;
use crate::output::{date, OutputFormat, TableDisplay};

/// Handler for the info command.
pub struct InfoCommand<'a> {
    store_dir: &'a Path,
    config: &'a EngineConfig,
}

impl<'a> InfoCommand<'a> {
    /// Creates a new info command handler.
    #[must_use]
    pub const fn new(store_dir: &'a Path, config: &'a EngineConfig) -> Self {
        Self { store_dir, config }
    }

    /// Executes the info command.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened.
    pub async fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
    ) -> Result<(), CliError> {
        let offset = self.config.utc_offset()?;
        let session = open_session(self.store_dir, self.config.clone())?;
        let info = session.session_info();

        let report = StoreInfo {
            store: self.store_dir.display().to_string(),
            schema_version: SCHEMA_VERSION,
            records: session.len(),
            log_types: session.type_histogram().len(),
            serial_number: info.as_ref().map(|i| i.serial_number.clone()),
            base_date: info.map(|i| date(i.base_date, offset)),
        };

        format.write(out, &report)
    }
}

/// Store summary for display.
#[derive(Debug, Clone, Serialize)]
pub struct StoreInfo {
    /// Store directory.
    pub store: String,
    /// Schema version of the store.
    pub schema_version: u32,
    /// Stored records.
    pub records: usize,
    /// Distinct log types.
    pub log_types: usize,
    /// Device serial of the first record carrying one.
    pub serial_number: Option<String>,
    /// Base date, `YYYY-MM-DD`.
    pub base_date: Option<String>,
}

impl TableDisplay for StoreInfo {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Store: {}", self.store)?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Schema version:   {}", self.schema_version)?;
        writeln!(writer, "Records:          {}", self.records)?;
        writeln!(writer, "Log types:        {}", self.log_types)?;
        writeln!(
            writer,
            "Serial number:    {}",
            self.serial_number.as_deref().unwrap_or("-")
        )?;
        writeln!(
            writer,
            "Base date:        {}",
            self.base_date.as_deref().unwrap_or("-")
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Format;

    #[tokio::test]
    async fn info_on_empty_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = EngineConfig::default();

        let mut out = Vec::new();
        InfoCommand::new(dir.path(), &config)
            .execute(&mut out, &OutputFormat::new(Format::Json))
            .await
            .expect("info");

        let json: serde_json::Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(json["records"], 0);
        assert_eq!(json["schema_version"], SCHEMA_VERSION);
        assert!(json["serial_number"].is_null());
    }

    #[test]
    fn table_output() {
        let info = StoreInfo {
            store: ".logsift".into(),
            schema_version: 4,
            records: 12,
            log_types: 3,
            serial_number: Some("AB12".into()),
            base_date: Some("2024-03-14".into()),
        };
        let output = OutputFormat::default().render(&info).expect("format");
        assert!(output.contains("Records:          12"));
        assert!(output.contains("Serial number:    AB12"));
        assert!(output.contains("Base date:        2024-03-14"));
    }
}
