//! Ingest command implementation.
//!
//! Reads a log file and replaces the stored records with its lines.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use logsift_core::{EngineConfig, IngestMode};
use serde::Serialize;
use tracing::info;

use crate::cli::IngestArgs;
use crate::commands::open_session;
use crate::error::CliError;
use crate::output::{OutputFormat, TableDisplay};

/// Handler for the ingest command.
pub struct IngestCommand<'a> {
    store_dir: &'a Path,
    config: &'a EngineConfig,
}

impl<'a> IngestCommand<'a> {
    /// Creates a new ingest command handler.
    #[must_use]
    pub const fn new(store_dir: &'a Path, config: &'a EngineConfig) -> Self {
        Self { store_dir, config }
    }

    /// Executes the ingest command.
    ///
    /// # Errors
    ///
    /// Returns error if the file is rejected or cannot be ingested.
    pub async fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        args: &IngestArgs,
    ) -> Result<(), CliError> {
        let config = self.effective_config(args);
        let session = open_session(self.store_dir, config)?;

        let summary = session.ingest_file(&args.file).await?;
        info!(
            file = %args.file.display(),
            lines = summary.total_lines,
            "ingested log file"
        );

        let report = IngestReport {
            file: args.file.display().to_string(),
            mode: match session.config().ingest_mode {
                IngestMode::Staged => "staged",
                IngestMode::InPlace => "in_place",
            },
            total_lines: summary.total_lines,
            batches: summary.batches,
            fallback_timestamps: summary.fallback_timestamps,
            timestamp_origins: summary.timestamp_origins,
            log_types: session.type_histogram().len(),
            serial_number: session.session_info().map(|info| info.serial_number),
        };

        format.write(out, &report)
    }

    fn effective_config(&self, args: &IngestArgs) -> EngineConfig {
        let mut config = self.config.clone();
        if args.in_place {
            config = config.with_ingest_mode(IngestMode::InPlace);
        }
        if args.any_extension {
            config = config.with_require_log_extension(false);
        }
        if let Some(batch_size) = args.batch_size {
            config = config.with_batch_size(batch_size);
        }
        config
    }
}

/// Ingest summary for display.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    /// Ingested file.
    pub file: String,
    /// Replacement strategy used.
    pub mode: &'static str,
    /// Lines ingested.
    pub total_lines: usize,
    /// Batches written.
    pub batches: usize,
    /// Lines stamped with the ingest clock.
    pub fallback_timestamps: usize,
    /// Lines per timestamp strategy.
    pub timestamp_origins: BTreeMap<String, usize>,
    /// Distinct log types.
    pub log_types: usize,
    /// Device serial, if one was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl TableDisplay for IngestReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Ingested {}", self.file)?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Mode:             {}", self.mode)?;
        writeln!(writer, "Lines:            {}", self.total_lines)?;
        writeln!(writer, "Batches:          {}", self.batches)?;
        writeln!(writer, "Log types:        {}", self.log_types)?;
        if !self.timestamp_origins.is_empty() {
            let origins: Vec<String> = self
                .timestamp_origins
                .iter()
                .map(|(origin, lines)| format!("{origin} {lines}"))
                .collect();
            writeln!(writer, "Timestamps:       {}", origins.join(", "))?;
        }
        writeln!(
            writer,
            "Serial number:    {}",
            self.serial_number.as_deref().unwrap_or("-")
        )?;
        if self.fallback_timestamps > 0 {
            writeln!(writer)?;
            writeln!(
                writer,
                "{} line(s) had no timestamp and were stamped with the ingest time",
                self.fallback_timestamps
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Format;
    use std::path::PathBuf;

    fn args(file: PathBuf) -> IngestArgs {
        IngestArgs {
            file,
            in_place: false,
            any_extension: false,
            batch_size: None,
        }
    }

    #[test]
    fn effective_config_applies_flags() {
        let base = EngineConfig::default();
        let cmd = IngestCommand::new(Path::new("."), &base);

        let mut flags = args(PathBuf::from("x.txt"));
        flags.in_place = true;
        flags.any_extension = true;
        flags.batch_size = Some(10);

        let config = cmd.effective_config(&flags);
        assert_eq!(config.ingest_mode, IngestMode::InPlace);
        assert!(!config.require_log_extension);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn report_table_mentions_fallbacks() {
        let report = IngestReport {
            file: "device.log".into(),
            mode: "staged",
            total_lines: 3,
            batches: 1,
            fallback_timestamps: 2,
            timestamp_origins: BTreeMap::from([
                ("ingest_clock".to_string(), 2),
                ("iso8601".to_string(), 1),
            ]),
            log_types: 2,
            serial_number: None,
        };
        let output = OutputFormat::new(Format::Table).render(&report).expect("format");
        assert!(output.contains("Lines:            3"));
        assert!(output.contains("Serial number:    -"));
        assert!(output.contains("2 line(s) had no timestamp"));
        assert!(output.contains("Timestamps:       ingest_clock 2, iso8601 1"));
    }

    #[tokio::test]
    async fn execute_ingests_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("device.log");
        std::fs::write(&file, "2024-03-14T12:34:56.789Z alexa35-AB12 kernel: boot\napp: idle")
            .expect("write");

        let config = EngineConfig::default();
        let cmd = IngestCommand::new(dir.path(), &config);
        let mut out = Vec::new();
        cmd.execute(&mut out, &OutputFormat::new(Format::Json), &args(file))
            .await
            .expect("execute");

        let json: serde_json::Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(json["total_lines"], 2);
        assert_eq!(json["serial_number"], "AB12");
        assert_eq!(json["mode"], "staged");
        assert_eq!(json["timestamp_origins"]["iso8601"], 1);
        assert_eq!(json["timestamp_origins"]["ingest_clock"], 1);
    }

    #[tokio::test]
    async fn execute_rejects_non_log_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("device.txt");
        std::fs::write(&file, "kernel: boot").expect("write");

        let config = EngineConfig::default();
        let cmd = IngestCommand::new(dir.path(), &config);
        let result = cmd
            .execute(&mut Vec::new(), &OutputFormat::default(), &args(file))
            .await;
        assert!(matches!(result, Err(CliError::Engine(_))));
    }
}
