//! Session facade over one record store.
//!
//! A [`LogSession`] owns the injected store handle, the parser built from
//! configuration, and the state derived from the current record set. That
//! derived state (session info, type histogram) is recomputed once per ingest
//! and reused by every query until the next ingest replaces it.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{FixedOffset, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::{EngineConfig, IngestMode};
use crate::error::{IngestError, LogsiftError, QueryError, StoreError};
use crate::ingest::{IngestProgress, IngestSummary, Ingestor};
use crate::paginate::{self, Page};
use crate::parser::LineParser;
use crate::query::{self, QueryEngine, QueryOutcome};
use crate::store::{MemoryRecordStore, SharedRecordStore};
use crate::types::{LineNumber, QuerySpec, SessionInfo, TypeHistogram};

/// Extension accepted by [`LogSession::ingest_file`].
pub const LOG_EXTENSION: &str = "log";

#[derive(Debug, Default, Clone)]
struct DerivedState {
    session_info: Option<SessionInfo>,
    type_histogram: TypeHistogram,
}

/// Resets a flag when dropped.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }

    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Ingest, query and pagination over one record store.
pub struct LogSession {
    config: EngineConfig,
    engine: QueryEngine,
    ingesting: AtomicBool,
    rewriting: AtomicBool,
    core: Arc<SessionCore>,
}

/// What an ingest job touches; shared with blocking ingest tasks.
struct SessionCore {
    store: SharedRecordStore,
    parser: LineParser,
    offset: FixedOffset,
    batch_size: usize,
    mode: IngestMode,
    derived: RwLock<DerivedState>,
    progress: watch::Sender<IngestProgress>,
}

impl SessionCore {
    fn ingest(&self, raw: &str) -> Result<IngestSummary, IngestError> {
        let ingestor = Ingestor::new(&self.parser)
            .with_batch_size(self.batch_size)
            .with_mode(self.mode)
            .with_progress(&self.progress);
        let clock = Utc::now();

        match self.mode {
            IngestMode::Staged => {
                let prepared = ingestor.prepare(self.store.as_ref(), raw, clock)?;
                // Queries read derived state and records under one read guard.
                let mut derived = self.derived.write();
                let summary = prepared.commit()?;
                *derived = self.derive()?;
                Ok(summary)
            }
            IngestMode::InPlace => {
                let result = ingestor.run(self.store.as_ref(), raw, clock);
                // A failed in-place ingest may still have rewritten the store.
                self.refresh()?;
                result
            }
        }
    }

    fn derive(&self) -> Result<DerivedState, StoreError> {
        let records = self.store.get_all()?;
        let derived = DerivedState {
            session_info: query::session_info(&records, self.offset),
            type_histogram: query::type_histogram(&records),
        };
        debug!(
            records = records.len(),
            log_types = derived.type_histogram.len(),
            "derived state refreshed"
        );
        Ok(derived)
    }

    fn refresh(&self) -> Result<(), StoreError> {
        let derived = self.derive()?;
        *self.derived.write() = derived;
        Ok(())
    }
}

impl std::fmt::Debug for LogSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSession")
            .field("config", &self.config)
            .field("records", &self.core.store.len())
            .field("ingesting", &self.is_ingesting())
            .finish_non_exhaustive()
    }
}

impl LogSession {
    /// Opens a session over `store`, deriving state from any existing records.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the store cannot
    /// be read.
    pub fn open(store: SharedRecordStore, config: EngineConfig) -> Result<Self, LogsiftError> {
        config.validate()?;
        let parser = LineParser::from_config(&config)?;
        let offset = parser.offset();
        let (progress, _) = watch::channel(IngestProgress::default());

        let core = SessionCore {
            store,
            parser,
            offset,
            batch_size: config.batch_size,
            mode: config.ingest_mode,
            derived: RwLock::new(DerivedState::default()),
            progress,
        };
        core.refresh()?;

        Ok(Self {
            config,
            engine: QueryEngine::new(offset),
            ingesting: AtomicBool::new(false),
            rewriting: AtomicBool::new(false),
            core: Arc::new(core),
        })
    }

    /// Opens a session over a fresh in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn in_memory(config: EngineConfig) -> Result<Self, LogsiftError> {
        Self::open(Arc::new(MemoryRecordStore::new()), config)
    }

    /// Returns the session configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the shared store handle.
    #[must_use]
    pub fn store(&self) -> &SharedRecordStore {
        &self.core.store
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.store.len()
    }

    /// Returns true if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.store.is_empty()
    }

    /// Returns true while an ingest is running.
    #[must_use]
    pub fn is_ingesting(&self) -> bool {
        self.ingesting.load(Ordering::Acquire)
    }

    /// Subscribes to ingest progress updates.
    #[must_use]
    pub fn subscribe_progress(&self) -> watch::Receiver<IngestProgress> {
        self.core.progress.subscribe()
    }

    /// Device serial and base date of the current record set.
    #[must_use]
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.core.derived.read().session_info.clone()
    }

    /// Record count per log type over the current record set.
    #[must_use]
    pub fn type_histogram(&self) -> TypeHistogram {
        self.core.derived.read().type_histogram.clone()
    }

    /// Ingests raw text on the calling thread, replacing the current record
    /// set.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::AlreadyRunning`] if another ingest holds the
    /// session, or an error if the store rejects the records.
    pub fn ingest(&self, raw: &str) -> Result<IngestSummary, IngestError> {
        let _guards = self.begin_ingest()?;
        self.core.ingest(raw)
    }

    /// Reads `path` and ingests its contents on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::UnsupportedFile`] if `.log` files are required
    /// and `path` is not one, [`IngestError::Io`] if it cannot be read,
    /// [`IngestError::Task`] if the ingest task dies, or any error from
    /// [`LogSession::ingest`].
    pub async fn ingest_file(&self, path: impl AsRef<Path>) -> Result<IngestSummary, IngestError> {
        let path = path.as_ref();
        if self.config.require_log_extension && !has_log_extension(path) {
            return Err(IngestError::UnsupportedFile {
                path: path.to_path_buf(),
            });
        }

        let raw = tokio::fs::read_to_string(path).await?;
        info!(path = %path.display(), bytes = raw.len(), "read log file");

        let _guards = self.begin_ingest()?;
        let core = Arc::clone(&self.core);
        tokio::task::spawn_blocking(move || core.ingest(&raw)).await?
    }

    /// Evaluates `spec` over the whole record set.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::IngestInProgress`] while an in-place ingest is
    /// rewriting the store, or an error if the store cannot be read.
    pub fn query(&self, spec: &QuerySpec) -> Result<QueryOutcome, QueryError> {
        self.ensure_readable()?;

        let derived = self.core.derived.read();
        let records = self.core.store.get_all()?;
        let matched_line_numbers = self.engine.matching_line_numbers(&records, spec);
        debug!(
            matched = matched_line_numbers.len(),
            total = records.len(),
            "query evaluated"
        );

        Ok(QueryOutcome {
            status: query::status_line(matched_line_numbers.len(), spec),
            type_histogram: derived.type_histogram.clone(),
            base_date: derived.session_info.as_ref().map(|info| info.base_date),
            matched_line_numbers,
        })
    }

    /// Resolves one page of a key sequence returned by [`LogSession::query`].
    ///
    /// # Errors
    ///
    /// Returns an error for a zero page size or page number, while an
    /// in-place ingest is running, or if the store cannot be read.
    pub fn page(
        &self,
        keys: &[LineNumber],
        page_size: usize,
        page_number: usize,
    ) -> Result<Page, QueryError> {
        self.ensure_readable()?;
        paginate::page(keys, page_size, page_number, self.core.store.as_ref())
    }

    /// Resolves one page using the configured page size.
    ///
    /// # Errors
    ///
    /// See [`LogSession::page`].
    pub fn page_with_default_size(
        &self,
        keys: &[LineNumber],
        page_number: usize,
    ) -> Result<Page, QueryError> {
        self.page(keys, self.config.page_size, page_number)
    }

    /// Recomputes the derived state from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn refresh(&self) -> Result<(), StoreError> {
        self.core.refresh()
    }

    fn begin_ingest(&self) -> Result<(FlagGuard<'_>, Option<FlagGuard<'_>>), IngestError> {
        let running =
            FlagGuard::try_acquire(&self.ingesting).ok_or(IngestError::AlreadyRunning)?;
        let rewriting = (self.config.ingest_mode == IngestMode::InPlace)
            .then(|| FlagGuard::raise(&self.rewriting));
        Ok((running, rewriting))
    }

    fn ensure_readable(&self) -> Result<(), QueryError> {
        if self.rewriting.load(Ordering::Acquire) {
            return Err(QueryError::IngestInProgress);
        }
        Ok(())
    }
}

fn has_log_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(LOG_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_store::FileRecordStore;
    use crate::traits::{RecordStore, StagedWrite};
    use crate::types::{LogRecord, TimeOfDayRange};
    use chrono::DateTime;
    use std::sync::{OnceLock, Weak};
    use std::thread::ThreadId;

    const LOG: &str = "\
2024-03-14T12:34:56.789Z alexa35-AB12 kernel: boot complete
2024-03-14 08:15:00 app: Started Service
[14/Mar/2024:01:30:00 +0000] concern[371]: battery low
kernel: no timestamp at all";

    fn session() -> LogSession {
        LogSession::in_memory(EngineConfig::default()).expect("session")
    }

    // ===========================================
    // Ingest Tests
    // ===========================================

    #[test]
    fn ingest_derives_session_state() {
        let session = session();
        assert!(session.session_info().is_none());

        let summary = session.ingest(LOG).expect("ingest");
        assert_eq!(summary.total_lines, 4);
        assert_eq!(summary.fallback_timestamps, 1);
        assert_eq!(session.len(), 4);

        let info = session.session_info().expect("info");
        assert_eq!(info.serial_number, "AB12");
        assert_eq!(info.base_date.to_rfc3339(), "2024-03-14T00:00:00+00:00");

        let histogram = session.type_histogram();
        assert_eq!(histogram.get("kernel"), Some(&2));
        assert_eq!(histogram.get("concern[371]"), Some(&1));
    }

    #[test]
    fn reingest_replaces_derived_state() {
        let session = session();
        session.ingest(LOG).expect("first");
        session.ingest("app: only line").expect("second");

        assert_eq!(session.len(), 1);
        assert!(session.session_info().is_none());
        assert_eq!(session.type_histogram().get("app"), Some(&1));
        assert!(session.type_histogram().get("kernel").is_none());
    }

    #[test]
    fn concurrent_ingest_is_rejected() {
        let session = session();
        let _held = FlagGuard::try_acquire(&session.ingesting).expect("flag");
        assert!(session.is_ingesting());

        assert!(matches!(
            session.ingest(LOG),
            Err(IngestError::AlreadyRunning)
        ));
    }

    #[test]
    fn query_during_in_place_rewrite_is_rejected() {
        let session = session();
        session.ingest(LOG).expect("ingest");

        let _rewriting = FlagGuard::raise(&session.rewriting);
        assert!(matches!(
            session.query(&QuerySpec::new()),
            Err(QueryError::IngestInProgress)
        ));
        assert!(matches!(
            session.page(&[1], 10, 1),
            Err(QueryError::IngestInProgress)
        ));
    }

    #[test]
    fn in_place_mode_releases_flags() {
        let config = EngineConfig::default().with_ingest_mode(IngestMode::InPlace);
        let session = LogSession::in_memory(config).expect("session");
        session.ingest(LOG).expect("ingest");

        assert!(!session.is_ingesting());
        assert_eq!(session.query(&QuerySpec::new()).expect("query").total_matches(), 4);
    }

    #[test]
    fn progress_subscribers_see_completion() {
        let session = session();
        let rx = session.subscribe_progress();
        session.ingest(LOG).expect("ingest");
        assert_eq!(*rx.borrow(), IngestProgress::new(4, 4));
    }

    // ===========================================
    // Query and Page Tests
    // ===========================================

    #[test]
    fn query_then_page() {
        let session = session();
        session.ingest(LOG).expect("ingest");

        let outcome = session
            .query(&QuerySpec::new().with_search("BOOT").case_sensitive(false))
            .expect("query");
        assert_eq!(outcome.matched_line_numbers, vec![1]);
        assert_eq!(outcome.status, "Found 1 matching records");
        assert_eq!(outcome.type_histogram.values().sum::<usize>(), 4);
        assert!(outcome.base_date.is_some());

        let page = session
            .page(&outcome.matched_line_numbers, 300, 1)
            .expect("page");
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].content, "boot complete");
    }

    #[test]
    fn time_filter_through_session() {
        let session = session();
        session.ingest(LOG).expect("ingest");

        let spec = QuerySpec::new().with_time_range(TimeOfDayRange::parse("01:00", "02:00"));
        let keys = session.query(&spec).expect("query").matched_line_numbers;

        // Line 4 carries the ingest clock, so only the dated lines are fixed.
        assert!(keys.contains(&3));
        assert!(!keys.contains(&1));
        assert!(!keys.contains(&2));
    }

    #[test]
    fn default_page_size_comes_from_config() {
        let config = EngineConfig::default().with_page_size(2);
        let session = LogSession::in_memory(config).expect("session");
        session.ingest(LOG).expect("ingest");

        let keys = session.query(&QuerySpec::new()).expect("query").matched_line_numbers;
        let page = session.page_with_default_size(&keys, 2).expect("page");
        assert_eq!(page.total_pages, 2);
        assert_eq!(
            page.records.iter().map(|r| r.line_number).collect::<Vec<_>>(),
            vec![3, 4]
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig::default().with_batch_size(0);
        assert!(matches!(
            LogSession::in_memory(config),
            Err(LogsiftError::Config(_))
        ));
    }

    // ===========================================
    // File Tests
    // ===========================================

    #[tokio::test]
    async fn ingest_file_reads_log_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("device.log");
        std::fs::write(&path, LOG).expect("write");

        let session = session();
        let summary = session.ingest_file(&path).await.expect("ingest");
        assert_eq!(summary.total_lines, 4);
    }

    #[tokio::test]
    async fn ingest_file_rejects_other_extensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("device.txt");
        std::fs::write(&path, LOG).expect("write");

        let session = session();
        assert!(matches!(
            session.ingest_file(&path).await,
            Err(IngestError::UnsupportedFile { .. })
        ));

        let relaxed = LogSession::in_memory(
            EngineConfig::default().with_require_log_extension(false),
        )
        .expect("session");
        assert!(relaxed.ingest_file(&path).await.is_ok());
    }

    #[tokio::test]
    async fn ingest_file_reports_missing_file() {
        let session = session();
        assert!(matches!(
            session.ingest_file("/nonexistent/device.log").await,
            Err(IngestError::Io(_))
        ));
    }

    #[test]
    fn reopened_file_store_restores_derived_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = Arc::new(FileRecordStore::with_base_dir(dir.path()).expect("store"));
            let session = LogSession::open(store, EngineConfig::default()).expect("session");
            session.ingest(LOG).expect("ingest");
        }

        let store = Arc::new(FileRecordStore::with_base_dir(dir.path()).expect("store"));
        let session = LogSession::open(store, EngineConfig::default()).expect("session");
        assert_eq!(session.len(), 4);
        assert_eq!(
            session.session_info().map(|info| info.serial_number),
            Some("AB12".to_string())
        );
    }

    #[test]
    fn ingest_against_store_staged_elsewhere_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let holder = FileRecordStore::with_base_dir(dir.path()).expect("store");
        let _staged = holder.stage().expect("stage");

        let store = Arc::new(FileRecordStore::with_base_dir(dir.path()).expect("store"));
        let session = LogSession::open(store, EngineConfig::default()).expect("session");
        assert!(matches!(session.ingest(LOG), Err(IngestError::AlreadyRunning)));

        let store = Arc::new(FileRecordStore::with_base_dir(dir.path()).expect("store"));
        let config = EngineConfig::default().with_ingest_mode(IngestMode::InPlace);
        let in_place = LogSession::open(store, config).expect("session");
        assert!(matches!(in_place.ingest(LOG), Err(IngestError::AlreadyRunning)));
        assert!(!in_place.is_ingesting());
    }

    // ===========================================
    // Swap Visibility Tests
    // ===========================================

    /// Memory store that records what the session looked like mid-swap.
    #[derive(Default)]
    struct WatchedStore {
        inner: MemoryRecordStore,
        core: OnceLock<Weak<SessionCore>>,
        derived_readable_during_swap: AtomicBool,
        swap_thread: parking_lot::Mutex<Option<ThreadId>>,
    }

    struct WatchedStage<'a> {
        store: &'a WatchedStore,
        inner: Box<dyn StagedWrite + 'a>,
    }

    impl StagedWrite for WatchedStage<'_> {
        fn put_batch(&mut self, records: &[LogRecord]) -> Result<(), StoreError> {
            self.inner.put_batch(records)
        }

        fn staged_len(&self) -> usize {
            self.inner.staged_len()
        }

        fn commit(self: Box<Self>, expected_len: usize) -> Result<(), StoreError> {
            let readable = self
                .store
                .core
                .get()
                .and_then(Weak::upgrade)
                .is_some_and(|core| core.derived.try_read().is_some());
            self.store
                .derived_readable_during_swap
                .store(readable, Ordering::SeqCst);
            *self.store.swap_thread.lock() = Some(std::thread::current().id());
            self.inner.commit(expected_len)
        }
    }

    impl RecordStore for WatchedStore {
        fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear()
        }

        fn bulk_put(&self, records: &[LogRecord]) -> Result<(), StoreError> {
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
            Ok(Box::new(WatchedStage {
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

    fn watched_session() -> (Arc<WatchedStore>, LogSession) {
        let store = Arc::new(WatchedStore::default());
        let session =
            LogSession::open(Arc::clone(&store) as SharedRecordStore, EngineConfig::default())
                .expect("session");
        assert!(store.core.set(Arc::downgrade(&session.core)).is_ok());
        (store, session)
    }

    #[test]
    fn staged_swap_holds_derived_state() {
        let (store, session) = watched_session();
        session.ingest(LOG).expect("ingest");

        assert!(!store.derived_readable_during_swap.load(Ordering::SeqCst));
        assert_eq!(session.type_histogram().values().sum::<usize>(), 4);
        assert!(session.query(&QuerySpec::new()).is_ok());
    }

    #[tokio::test]
    async fn ingest_file_runs_off_the_calling_thread() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("device.log");
        std::fs::write(&path, LOG).expect("write");

        let (store, session) = watched_session();
        session.ingest_file(&path).await.expect("ingest");

        let swap_thread = (*store.swap_thread.lock()).expect("swap ran");
        assert_ne!(swap_thread, std::thread::current().id());
        assert_eq!(session.len(), 4);
        assert!(!session.is_ingesting());
    }

    #[test]
    fn has_log_extension_is_case_insensitive() {
        assert!(has_log_extension(Path::new("a/b/device.log")));
        assert!(has_log_extension(Path::new("DEVICE.LOG")));
        assert!(!has_log_extension(Path::new("device.log.gz")));
        assert!(!has_log_extension(Path::new("device")));
    }
}
