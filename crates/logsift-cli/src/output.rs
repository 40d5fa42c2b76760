//! Output formatting for CLI commands.
//!
//! Every command result implements [`TableDisplay`] and `Serialize`, so one
//! [`OutputFormat`] value decides how it reaches stdout.

use std::io::Write;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use crate::cli::Format;
use crate::error::CliError;

/// Renders command results as a table or as pretty JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Creates a renderer for `format`.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Returns true for JSON output.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Renders `value` to `writer`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be encoded or `writer` fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        if self.is_json() {
            let json = serde_json::to_string_pretty(value)
                .map_err(|e| CliError::Format(format!("cannot encode result as JSON: {e}")))?;
            writeln!(writer, "{json}")?;
            return Ok(());
        }
        value.write_table(writer)
    }

    /// Renders `value` into a string.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be rendered.
    pub fn render<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("output is not UTF-8: {e}")))
    }
}

/// Human-readable rendering of a command result.
pub trait TableDisplay {
    /// Writes the table form of `self`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// Formats an instant as `HH:MM:SS.mmm` in `offset` local time.
#[must_use]
pub fn time_of_day(timestamp: DateTime<Utc>, offset: FixedOffset) -> String {
    timestamp
        .with_timezone(&offset)
        .format("%H:%M:%S%.3f")
        .to_string()
}

/// Formats an instant as `YYYY-MM-DD` in `offset` local time.
#[must_use]
pub fn date(timestamp: DateTime<Utc>, offset: FixedOffset) -> String {
    timestamp
        .with_timezone(&offset)
        .format("%Y-%m-%d")
        .to_string()
}

/// Shortens `s` to `max_len` characters, marking the cut with `...`.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        name: String,
    }

    impl TableDisplay for Sample {
        fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
            writeln!(writer, "Name: {}", self.name)?;
            Ok(())
        }
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).expect("utc")
    }

    #[test]
    fn output_format_table() {
        let fmt = OutputFormat::new(Format::Table);
        assert!(!fmt.is_json());
        let out = fmt.render(&Sample { name: "kernel".into() }).expect("format");
        assert_eq!(out, "Name: kernel\n");
    }

    #[test]
    fn output_format_json() {
        let fmt = OutputFormat::new(Format::Json);
        assert!(fmt.is_json());
        let out = fmt.render(&Sample { name: "kernel".into() }).expect("format");
        assert!(out.contains("\"name\": \"kernel\""));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn time_of_day_has_millis() {
        let ts = DateTime::from_timestamp_millis(1_710_419_696_789).expect("ts");
        assert_eq!(time_of_day(ts, utc()), "12:34:56.789");
        assert_eq!(date(ts, utc()), "2024-03-14");

        let plus_one = FixedOffset::east_opt(3600).expect("offset");
        assert_eq!(time_of_day(ts, plus_one), "13:34:56.789");
    }

    #[test]
    fn truncate_long_strings() {
        assert_eq!(truncate("kernel", 10), "kernel");
        assert_eq!(truncate("concern[371]", 8), "conce...");
        assert_eq!(truncate("abcdef", 3), "abc");
    }
}
