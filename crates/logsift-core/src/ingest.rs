//! Chunked ingest of raw log text into a record store.
//!
//! Raw text is split into lines, parsed chunk by chunk and written in bounded
//! batches. Progress is published after each batch is accepted by the store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_BATCH_SIZE, IngestMode};
use crate::error::{IngestError, StoreError};
use crate::parser::LineParser;
use crate::traits::{RecordStore, StagedWrite};
use crate::types::{LineNumber, LogRecord};

/// Lines written so far out of the total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestProgress {
    /// Lines written
    pub current: usize,
    /// Lines in the source
    pub total: usize,
}

impl IngestProgress {
    /// Creates a progress value.
    #[must_use]
    pub const fn new(current: usize, total: usize) -> Self {
        Self { current, total }
    }

    /// Completion percentage, 0-100.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.current as f64 * 100.0 / self.total as f64
    }

    /// Returns true once every line has been written.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.current >= self.total
    }
}

/// Outcome of a completed ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    /// Number of lines (and records) ingested
    pub total_lines: usize,
    /// Final progress
    pub progress: IngestProgress,
    /// Lines whose timestamp fell back to the ingest clock
    pub fallback_timestamps: usize,
    /// Batches written
    pub batches: usize,
    /// Lines per timestamp strategy, keyed by origin name
    #[serde(default)]
    pub timestamp_origins: BTreeMap<String, usize>,
}

/// Splits raw text on `\n`, stripping one trailing `\r` per line.
///
/// A trailing empty segment after the final newline still counts as a line,
/// so the line count is always the newline count plus one.
pub fn split_lines(raw: &str) -> impl Iterator<Item = &str> {
    raw.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
}

/// Sequential ingest job over one store.
pub struct Ingestor<'a> {
    parser: &'a LineParser,
    batch_size: usize,
    mode: IngestMode,
    progress: Option<&'a watch::Sender<IngestProgress>>,
}

impl<'a> Ingestor<'a> {
    /// Creates an ingestor with the default batch size and staged mode.
    #[must_use]
    pub const fn new(parser: &'a LineParser) -> Self {
        Self {
            parser,
            batch_size: DEFAULT_BATCH_SIZE,
            mode: IngestMode::Staged,
            progress: None,
        }
    }

    /// Sets the lines per batch; zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sets the replacement strategy.
    #[must_use]
    pub const fn with_mode(mut self, mode: IngestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Publishes progress on `sender` after every batch.
    #[must_use]
    pub const fn with_progress(mut self, sender: &'a watch::Sender<IngestProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Replaces the contents of `store` with the records parsed from `raw`.
    ///
    /// In [`IngestMode::Staged`] the previous records survive any failure.
    /// In [`IngestMode::InPlace`] batches written before a failure remain.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects a batch or the final swap.
    pub fn run(
        &self,
        store: &dyn RecordStore,
        raw: &str,
        ingest_clock: DateTime<Utc>,
    ) -> Result<IngestSummary, IngestError> {
        match self.mode {
            IngestMode::Staged => self.prepare(store, raw, ingest_clock)?.commit(),
            IngestMode::InPlace => {
                let lines: Vec<&str> = split_lines(raw).collect();
                let total = self.start(lines.len());
                store.clear().map_err(store_failure)?;
                let stats =
                    self.write_batches(&lines, ingest_clock, |batch| store.bulk_put(batch))?;
                Ok(finish(total, &stats))
            }
        }
    }

    /// Parses `raw` into a staged write on `store` without touching the live
    /// records, whatever the configured mode.
    ///
    /// The returned [`PreparedIngest`] swaps the records in on
    /// [`PreparedIngest::commit`]; dropping it discards them.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot open a staged write or rejects a
    /// batch.
    pub fn prepare<'s>(
        &self,
        store: &'s dyn RecordStore,
        raw: &str,
        ingest_clock: DateTime<Utc>,
    ) -> Result<PreparedIngest<'s>, IngestError> {
        let lines: Vec<&str> = split_lines(raw).collect();
        let total = self.start(lines.len());

        let mut staged = store.stage().map_err(store_failure)?;
        let stats = self.write_batches(&lines, ingest_clock, |batch| staged.put_batch(batch))?;
        Ok(PreparedIngest {
            staged,
            total,
            stats,
        })
    }

    fn start(&self, total: usize) -> usize {
        info!(total_lines = total, mode = ?self.mode, "starting ingest");
        self.publish(IngestProgress::new(0, total));
        total
    }

    fn write_batches(
        &self,
        lines: &[&str],
        ingest_clock: DateTime<Utc>,
        mut sink: impl FnMut(&[LogRecord]) -> Result<(), StoreError>,
    ) -> Result<BatchStats, IngestError> {
        let total = lines.len();
        let mut stats = BatchStats::default();
        let mut written = 0;

        for (index, chunk) in lines.chunks(self.batch_size).enumerate() {
            let first_line = index * self.batch_size + 1;
            let records: Vec<LogRecord> = chunk
                .iter()
                .enumerate()
                .map(|(offset, line)| {
                    let line_number = (first_line + offset) as LineNumber;
                    let parsed = self.parser.parse_detailed(line, line_number, ingest_clock);
                    if parsed.used_ingest_clock() {
                        stats.fallback_timestamps += 1;
                    }
                    *stats
                        .origins
                        .entry(parsed.timestamp_origin.as_str().to_string())
                        .or_default() += 1;
                    parsed.record
                })
                .collect();

            sink(&records).map_err(store_failure)?;
            written += records.len();
            stats.batches += 1;

            debug!(batch = stats.batches, written, total, "batch written");
            self.publish(IngestProgress::new(written, total));
        }

        Ok(stats)
    }

    fn publish(&self, progress: IngestProgress) {
        if let Some(sender) = self.progress {
            sender.send_replace(progress);
        }
    }
}

#[derive(Debug, Default)]
struct BatchStats {
    fallback_timestamps: usize,
    batches: usize,
    origins: BTreeMap<String, usize>,
}

/// Fully staged ingest waiting to replace the live records.
pub struct PreparedIngest<'s> {
    staged: Box<dyn StagedWrite + 's>,
    total: usize,
    stats: BatchStats,
}

impl PreparedIngest<'_> {
    /// Lines staged so far.
    #[must_use]
    pub const fn total_lines(&self) -> usize {
        self.total
    }

    /// Swaps the staged records in, checking that every line arrived.
    ///
    /// # Errors
    ///
    /// Returns an error if the count check or the swap fails; the live records
    /// are then left as they were.
    pub fn commit(self) -> Result<IngestSummary, IngestError> {
        self.staged.commit(self.total).map_err(store_failure)?;
        Ok(finish(self.total, &self.stats))
    }
}

/// A store busy with another writer means another ingest holds it.
fn store_failure(err: StoreError) -> IngestError {
    match err {
        StoreError::StagingActive => IngestError::AlreadyRunning,
        other => IngestError::Store(other),
    }
}

fn finish(total: usize, stats: &BatchStats) -> IngestSummary {
    if stats.fallback_timestamps > 0 {
        warn!(
            lines = stats.fallback_timestamps,
            "lines without a recognizable timestamp were stamped with the ingest clock"
        );
    }

    let summary = IngestSummary {
        total_lines: total,
        progress: IngestProgress::new(total, total),
        fallback_timestamps: stats.fallback_timestamps,
        batches: stats.batches,
        timestamp_origins: stats.origins.clone(),
    };
    info!(
        total_lines = summary.total_lines,
        batches = summary.batches,
        "ingest complete"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use chrono::FixedOffset;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn parser() -> LineParser {
        LineParser::new("alexa35", FixedOffset::east_opt(0).expect("utc")).expect("parser")
    }

    fn clock() -> DateTime<Utc> {
        DateTime::from_timestamp(1_900_000_000, 0).expect("clock")
    }

    fn keys(store: &dyn RecordStore) -> Vec<LineNumber> {
        let mut keys: Vec<_> = store
            .get_all()
            .expect("get_all")
            .iter()
            .map(|r| r.line_number)
            .collect();
        keys.sort_unstable();
        keys
    }

    const SAMPLE: &str = "2024-03-14T12:34:56.789Z alexa35-AB12 kernel: boot complete\n\
                          2024-03-14 12:35:00 app: started\r\n\
                          no timestamp here\n\
                          1710419760 watchdog: ping";

    // ===========================================
    // Line Splitting Tests
    // ===========================================

    #[test]
    fn split_lines_strips_carriage_returns() {
        let lines: Vec<_> = split_lines("a\r\nb\nc").collect();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[test]
    fn trailing_newline_yields_empty_last_line() {
        let lines: Vec<_> = split_lines("a\nb\n").collect();
        assert_eq!(lines, vec!["a", "b", ""]);
        assert_eq!(split_lines("").count(), 1);
    }

    // ===========================================
    // Ingest Tests
    // ===========================================

    #[test]
    fn staged_ingest_writes_every_line() {
        let parser = parser();
        let store = MemoryRecordStore::new();

        let summary = Ingestor::new(&parser)
            .with_batch_size(3)
            .run(&store, SAMPLE, clock())
            .expect("ingest");

        assert_eq!(summary.total_lines, 4);
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.fallback_timestamps, 1);
        assert!(summary.progress.is_complete());
        assert_eq!(summary.timestamp_origins.get("iso8601"), Some(&1));
        assert_eq!(summary.timestamp_origins.get("plain"), Some(&1));
        assert_eq!(summary.timestamp_origins.get("unix_epoch"), Some(&1));
        assert_eq!(summary.timestamp_origins.get("ingest_clock"), Some(&1));
        assert_eq!(keys(&store), vec![1, 2, 3, 4]);

        let first = store.get(1).expect("get").expect("line 1");
        assert_eq!(first.serial_number, "AB12");
        assert_eq!(first.log_type, "kernel");
        assert_eq!(first.content, "boot complete");

        let third = store.get(3).expect("get").expect("line 3");
        assert_eq!(third.timestamp, clock());
        assert_eq!(third.log_type, "unknown");
    }

    #[test]
    fn reingest_replaces_previous_records() {
        let parser = parser();
        let store = MemoryRecordStore::new();
        let ingestor = Ingestor::new(&parser);

        ingestor.run(&store, "a\nb\nc\nd\ne", clock()).expect("first");
        ingestor.run(&store, "x\ny", clock()).expect("second");

        assert_eq!(keys(&store), vec![1, 2]);
    }

    #[test]
    fn in_place_ingest_clears_then_writes() {
        let parser = parser();
        let store = MemoryRecordStore::new();
        Ingestor::new(&parser).run(&store, "a\nb\nc\nd", clock()).expect("first");

        let summary = Ingestor::new(&parser)
            .with_mode(IngestMode::InPlace)
            .with_batch_size(1)
            .run(&store, "x\ny", clock())
            .expect("second");

        assert_eq!(summary.batches, 2);
        assert_eq!(keys(&store), vec![1, 2]);
    }

    #[test]
    fn progress_is_published_per_batch() {
        let parser = parser();
        let store = MemoryRecordStore::new();
        let (tx, mut rx) = watch::channel(IngestProgress::default());

        Ingestor::new(&parser)
            .with_batch_size(2)
            .with_progress(&tx)
            .run(&store, "a\nb\nc\nd\ne", clock())
            .expect("ingest");

        assert!(rx.has_changed().expect("channel open"));
        let last = *rx.borrow_and_update();
        assert_eq!(last, IngestProgress::new(5, 5));
        assert!((last.percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_batch_size_is_treated_as_one() {
        let parser = parser();
        let store = MemoryRecordStore::new();
        let summary = Ingestor::new(&parser)
            .with_batch_size(0)
            .run(&store, "a\nb", clock())
            .expect("ingest");
        assert_eq!(summary.batches, 2);
    }

    // ===========================================
    // Failure Tests
    // ===========================================

    /// Memory store that fails every write after `fail_after` batches.
    struct FlakyStore {
        inner: MemoryRecordStore,
        fail_after: usize,
        writes: AtomicUsize,
    }

    impl FlakyStore {
        fn new(fail_after: usize) -> Self {
            Self {
                inner: MemoryRecordStore::new(),
                fail_after,
                writes: AtomicUsize::new(0),
            }
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }
    }

    struct FlakyStage<'a> {
        store: &'a FlakyStore,
        inner: Box<dyn StagedWrite + 'a>,
    }

    impl StagedWrite for FlakyStage<'_> {
        fn put_batch(&mut self, records: &[LogRecord]) -> Result<(), StoreError> {
            self.store.check()?;
            self.inner.put_batch(records)
        }

        fn staged_len(&self) -> usize {
            self.inner.staged_len()
        }

        fn commit(self: Box<Self>, expected_len: usize) -> Result<(), StoreError> {
            self.inner.commit(expected_len)
        }
    }

    impl RecordStore for FlakyStore {
        fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear()
        }

        fn bulk_put(&self, records: &[LogRecord]) -> Result<(), StoreError> {
            self.check()?;
            self.inner.bulk_put(records)
        }

        fn get_all(&self) -> Result<Vec<LogRecord>, StoreError> {
            self.inner.get_all()
        }

        fn get(&self, line_number: LineNumber) -> Result<Option<LogRecord>, StoreError> {
            self.inner.get(line_number)
        }

        fn get_by_keys(&self, keys: &[LineNumber]) -> Result<Vec<LogRecord>, StoreError> {
            self.inner.get_by_keys(keys)
        }

        fn len(&self) -> usize {
            self.inner.len()
        }

        fn stage(&self) -> Result<Box<dyn StagedWrite + '_>, StoreError> {
            Ok(Box::new(FlakyStage {
                store: self,
                inner: self.inner.stage()?,
            }))
        }

        fn keys_by_log_type(&self, log_type: &str) -> Vec<LineNumber> {
            self.inner.keys_by_log_type(log_type)
        }

        fn keys_by_serial(&self, serial_number: &str) -> Vec<LineNumber> {
            self.inner.keys_by_serial(serial_number)
        }

        fn keys_in_time_range(
            &self,
            start: Option<DateTime<Utc>>,
            end: Option<DateTime<Utc>>,
        ) -> Vec<LineNumber> {
            self.inner.keys_in_time_range(start, end)
        }

        fn keys_by_time_and_type(
            &self,
            log_type: &str,
            start: Option<DateTime<Utc>>,
            end: Option<DateTime<Utc>>,
        ) -> Vec<LineNumber> {
            self.inner.keys_by_time_and_type(log_type, start, end)
        }
    }

    #[test]
    fn failed_staged_ingest_keeps_previous_records() {
        let parser = parser();
        let store = FlakyStore::new(2);
        store.inner.bulk_put(&[parser.parse("old", 1, clock())]).expect("seed");

        let result = Ingestor::new(&parser)
            .with_batch_size(1)
            .run(&store, "a\nb\nc", clock());

        assert!(matches!(result, Err(IngestError::Store(StoreError::Io(_)))));
        assert_eq!(keys(&store), vec![1]);
        assert_eq!(store.get(1).expect("get").expect("old").content, "old");
    }

    #[test]
    fn failed_in_place_ingest_keeps_written_batches() {
        let parser = parser();
        let store = FlakyStore::new(2);

        let result = Ingestor::new(&parser)
            .with_mode(IngestMode::InPlace)
            .with_batch_size(1)
            .run(&store, "a\nb\nc", clock());

        assert!(result.is_err());
        assert_eq!(keys(&store), vec![1, 2]);
    }

    #[test]
    fn open_stage_blocks_staged_ingest() {
        let parser = parser();
        let store = MemoryRecordStore::new();
        let _held = store.stage().expect("stage");

        let result = Ingestor::new(&parser).run(&store, "a", clock());
        assert!(matches!(result, Err(IngestError::AlreadyRunning)));
    }

    #[test]
    fn prepared_ingest_leaves_live_records_until_commit() {
        let parser = parser();
        let store = MemoryRecordStore::new();
        Ingestor::new(&parser).run(&store, "old", clock()).expect("seed");

        let prepared = Ingestor::new(&parser)
            .with_mode(IngestMode::InPlace)
            .prepare(&store, "a\nb\nc", clock())
            .expect("prepare");
        assert_eq!(prepared.total_lines(), 3);
        assert_eq!(keys(&store), vec![1]);

        let summary = prepared.commit().expect("commit");
        assert_eq!(summary.total_lines, 3);
        assert_eq!(keys(&store), vec![1, 2, 3]);
    }

    #[test]
    fn dropped_prepared_ingest_discards_records() {
        let parser = parser();
        let store = MemoryRecordStore::new();
        Ingestor::new(&parser).run(&store, "old", clock()).expect("seed");

        drop(Ingestor::new(&parser).prepare(&store, "a\nb", clock()).expect("prepare"));
        assert_eq!(keys(&store), vec![1]);
        assert!(store.stage().is_ok());
    }

    proptest! {
        #[test]
        fn ingest_yields_one_record_per_line(
            lines in prop::collection::vec("[^\n]{0,30}", 1..60),
            batch_size in 1usize..8,
        ) {
            let parser = parser();
            let store = MemoryRecordStore::new();
            let raw = lines.join("\n");

            let summary = Ingestor::new(&parser)
                .with_batch_size(batch_size)
                .run(&store, &raw, clock())
                .expect("ingest");

            let expected: Vec<LineNumber> = (1..=lines.len() as u64).collect();
            prop_assert_eq!(summary.total_lines, lines.len());
            prop_assert_eq!(keys(&store), expected);
        }
    }
}
