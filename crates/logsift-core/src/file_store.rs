//! Directory-backed persistent record storage.
//!
//! This module provides:
//! - [`FileRecordStore`]: Persistent store keyed by line number
//! - JSON-lines table file plus a `meta.json` version tag
//! - Stage-then-swap replacement via a shadow table and `fs::rename`
//! - A lock file that admits one staged writer at a time across processes
//! - Destructive migration when the schema version changes
//!
//! Layout of the base directory:
//!
//! ```text
//! meta.json                         {"name":"logLines","version":4}
//! logLines.jsonl                    live table, one record per line
//! logLines.lock                     token of the writer holding the staging slot
//! logLines.staging.<token>.jsonl    that writer's shadow table
//! ```
//!
//! Records are loaded into memory on open; reads never touch the disk.
//! Appended duplicates of a line number are resolved on load, last one wins.
//! A final line cut short by an interrupted append is dropped on load and
//! trimmed before the next append.

use std::collections::BTreeMap;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::store::StoreState;
use crate::traits::{RecordStore, StagedWrite};
use crate::types::{LineNumber, LogRecord};

/// Current schema version; bump to force a destructive migration.
pub const SCHEMA_VERSION: u32 = 4;

/// Table name used for log lines.
pub const TABLE_NAME: &str = "logLines";

/// Age after which an untouched staging lock counts as abandoned.
pub const DEFAULT_STALE_LOCK_AFTER: Duration = Duration::from_secs(10 * 60);

const META_FILE: &str = "meta.json";

static NEXT_WRITER: AtomicU64 = AtomicU64::new(0);

/// Configuration for file-based record storage.
#[derive(Debug, Clone)]
pub struct FileRecordStoreConfig {
    /// Base directory for the table and its metadata.
    pub base_dir: PathBuf,
    /// Name of the table file (without extension).
    pub table_name: String,
    /// Schema version the opened store must carry.
    pub schema_version: u32,
    /// A staging lock not touched for this long may be broken.
    pub stale_lock_after: Duration,
}

impl Default for FileRecordStoreConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("logsift-store"),
            table_name: TABLE_NAME.to_string(),
            schema_version: SCHEMA_VERSION,
            stale_lock_after: DEFAULT_STALE_LOCK_AFTER,
        }
    }
}

impl FileRecordStoreConfig {
    /// Creates a new config with the given base directory.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Sets the table name.
    #[must_use]
    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    /// Sets the schema version.
    #[must_use]
    pub const fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// Sets the age after which an abandoned staging lock is broken.
    #[must_use]
    pub const fn with_stale_lock_after(mut self, age: Duration) -> Self {
        self.stale_lock_after = age;
        self
    }
}

/// Version tag persisted next to the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoreMeta {
    name: String,
    version: u32,
}

/// File-based record store.
pub struct FileRecordStore {
    config: FileRecordStoreConfig,
    state: RwLock<StoreState>,
}

impl FileRecordStore {
    /// Opens (or creates) a store, migrating destructively on version change.
    ///
    /// Shadow tables of abandoned staged writes are removed, but never while
    /// another writer holds the staging lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be prepared or the table
    /// contains an unreadable record.
    pub fn open(config: FileRecordStoreConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.base_dir)?;

        let store = Self {
            config,
            state: RwLock::new(StoreState::default()),
        };

        store.sweep_abandoned_staging()?;
        store.migrate_if_needed()?;

        let records = store.load_table()?;
        info!(
            path = %store.table_path().display(),
            records = records.len(),
            "opened record store"
        );
        *store.state.write() = StoreState::from_records(records);

        Ok(store)
    }

    /// Opens a store in `base_dir` with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open(FileRecordStoreConfig::new(base_dir))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &FileRecordStoreConfig {
        &self.config
    }

    /// Path of the live table file.
    #[must_use]
    pub fn table_path(&self) -> PathBuf {
        self.config
            .base_dir
            .join(format!("{}.jsonl", self.config.table_name))
    }

    /// Path of the staging lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.config
            .base_dir
            .join(format!("{}.lock", self.config.table_name))
    }

    fn staging_path(&self, token: &str) -> PathBuf {
        self.config
            .base_dir
            .join(format!("{}.staging.{token}.jsonl", self.config.table_name))
    }

    fn is_staging_file(&self, path: &Path) -> bool {
        let prefix = format!("{}.staging", self.config.table_name);
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(".jsonl"))
    }

    fn meta_path(&self) -> PathBuf {
        self.config.base_dir.join(META_FILE)
    }

    // ========== Internal Methods ==========

    fn lock(&self) -> Result<StagingLock, StoreError> {
        StagingLock::acquire(self.lock_path(), self.config.stale_lock_after)
    }

    fn ensure_unlocked(&self) -> Result<(), StoreError> {
        if lock_is_live(&self.lock_path(), self.config.stale_lock_after) {
            return Err(StoreError::StagingActive);
        }
        Ok(())
    }

    fn sweep_abandoned_staging(&self) -> Result<(), StoreError> {
        let _lock = match self.lock() {
            Ok(lock) => lock,
            Err(StoreError::StagingActive) => {
                debug!(
                    path = %self.lock_path().display(),
                    "staged write in progress; leaving shadow tables alone"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for entry in fs::read_dir(&self.config.base_dir)? {
            let path = entry?.path();
            if self.is_staging_file(&path) && fs::remove_file(&path).is_ok() {
                warn!(path = %path.display(), "discarded unfinished staged table");
            }
        }
        Ok(())
    }

    fn migrate_if_needed(&self) -> Result<(), StoreError> {
        let wanted = StoreMeta {
            name: self.config.table_name.clone(),
            version: self.config.schema_version,
        };

        let current = match fs::read_to_string(self.meta_path()) {
            Ok(raw) => serde_json::from_str::<StoreMeta>(&raw).ok(),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        if current.as_ref() == Some(&wanted) {
            return Ok(());
        }

        let table = self.table_path();
        if table.exists() {
            warn!(
                from_version = ?current.as_ref().map(|m| m.version),
                to_version = wanted.version,
                "schema version changed; dropping stored records"
            );
            fs::remove_file(&table)?;
        }

        write_atomically(&self.meta_path(), &serde_json::to_vec(&wanted)?)?;
        debug!(version = wanted.version, "wrote store metadata");
        Ok(())
    }

    fn load_table(&self) -> Result<BTreeMap<LineNumber, LogRecord>, StoreError> {
        let path = self.table_path();
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = BTreeMap::new();
        for (i, line) in raw.split_inclusive(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<LogRecord>(line) {
                Ok(record) => {
                    records.insert(record.line_number, record);
                }
                // Only the final segment can lack its newline.
                Err(e) if !line.ends_with(b"\n") => {
                    warn!(
                        path = %path.display(),
                        line = i + 1,
                        error = %e,
                        "dropping truncated final record"
                    );
                }
                Err(e) => {
                    return Err(StoreError::Corrupt {
                        path,
                        line: i + 1,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(records)
    }
}

/// Exclusive claim on a store's staging slot, visible to every process.
struct StagingLock {
    path: PathBuf,
    file: File,
    token: String,
}

impl StagingLock {
    fn acquire(path: PathBuf, stale_after: Duration) -> Result<Self, StoreError> {
        match Self::create(&path) {
            Err(StoreError::StagingActive) if !lock_is_live(&path, stale_after) => {
                warn!(path = %path.display(), "breaking abandoned staging lock");
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Self::create(&path)
            }
            result => result,
        }
    }

    fn create(path: &Path) -> Result<Self, StoreError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::StagingActive);
            }
            Err(e) => return Err(e.into()),
        };

        let token = writer_token();
        if let Err(e) = file.write_all(token.as_bytes()).and_then(|()| file.sync_all()) {
            if let Err(cleanup) = fs::remove_file(path) {
                debug!(path = %path.display(), error = %cleanup, "could not remove lock");
            }
            return Err(e.into());
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            token,
        })
    }

    /// Marks the lock as still in use.
    fn touch(&self) -> Result<(), StoreError> {
        self.file.set_modified(SystemTime::now())?;
        Ok(())
    }

    /// False once another writer has broken and replaced this lock.
    fn is_held(&self) -> bool {
        fs::read_to_string(&self.path).is_ok_and(|token| token == self.token)
    }
}

impl Drop for StagingLock {
    fn drop(&mut self) {
        if !self.is_held() {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "staging lock already gone");
        }
    }
}

fn writer_token() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let seq = NEXT_WRITER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{nanos}-{seq}", std::process::id())
}

fn lock_is_live(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path).is_ok_and(|meta| !is_stale(&meta, stale_after))
}

fn is_stale(meta: &Metadata, stale_after: Duration) -> bool {
    meta.modified()
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > stale_after)
}

/// Writes `bytes` to a sibling temp file and renames it over `path`.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn write_records<W: Write>(writer: &mut W, records: &[LogRecord]) -> Result<(), StoreError> {
    for record in records {
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Makes `table` end on a newline before appending to it.
///
/// An unterminated tail that still decodes gets its newline; anything else
/// after the last newline is cut off.
fn repair_tail(table: &mut File, path: &Path) -> Result<(), StoreError> {
    let len = table.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    let mut last = [0u8; 1];
    table.seek(SeekFrom::End(-1))?;
    table.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let mut raw = Vec::new();
    table.seek(SeekFrom::Start(0))?;
    table.read_to_end(&mut raw)?;
    let keep = raw
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |newline| newline + 1);

    if serde_json::from_slice::<LogRecord>(&raw[keep..]).is_ok() {
        table.seek(SeekFrom::End(0))?;
        table.write_all(b"\n")?;
    } else {
        warn!(
            path = %path.display(),
            bytes = raw.len() - keep,
            "trimming truncated final record"
        );
        table.set_len(keep as u64)?;
    }
    Ok(())
}

// ============================================================================
// Trait Implementations
// ============================================================================

impl RecordStore for FileRecordStore {
    fn clear(&self) -> Result<(), StoreError> {
        self.ensure_unlocked()?;
        let mut state = self.state.write();
        File::create(self.table_path())?;
        state.clear();
        Ok(())
    }

    fn bulk_put(&self, records: &[LogRecord]) -> Result<(), StoreError> {
        self.ensure_unlocked()?;
        let mut state = self.state.write();

        let path = self.table_path();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        repair_tail(&mut file, &path)?;
        file.seek(SeekFrom::End(0))?;

        let mut writer = BufWriter::new(file);
        write_records(&mut writer, records)?;
        writer.flush()?;

        for record in records {
            state.upsert(record.clone());
        }
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<LogRecord>, StoreError> {
        Ok(self.state.read().all())
    }

    fn get(&self, line_number: LineNumber) -> Result<Option<LogRecord>, StoreError> {
        Ok(self.state.read().get(line_number))
    }

    fn get_by_keys(&self, keys: &[LineNumber]) -> Result<Vec<LogRecord>, StoreError> {
        Ok(self.state.read().by_keys(keys))
    }

    fn len(&self) -> usize {
        self.state.read().len()
    }

    fn stage(&self) -> Result<Box<dyn StagedWrite + '_>, StoreError> {
        let lock = self.lock()?;
        let path = self.staging_path(&lock.token);
        let file = File::create(&path)?;
        debug!(path = %path.display(), "opened staged table");

        Ok(Box::new(FileStagedWrite {
            store: self,
            path,
            writer: Some(BufWriter::new(file)),
            shadow: BTreeMap::new(),
            committed: false,
            lock,
        }))
    }

    fn keys_by_log_type(&self, log_type: &str) -> Vec<LineNumber> {
        self.state.read().index().by_log_type(log_type)
    }

    fn keys_by_serial(&self, serial_number: &str) -> Vec<LineNumber> {
        self.state.read().index().by_serial(serial_number)
    }

    fn keys_in_time_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<LineNumber> {
        self.state.read().index().in_time_range(start, end)
    }

    fn keys_by_time_and_type(
        &self,
        log_type: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<LineNumber> {
        self.state.read().index().by_time_and_type(log_type, start, end)
    }
}

/// Shadow table for a [`FileRecordStore`].
struct FileStagedWrite<'a> {
    store: &'a FileRecordStore,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    shadow: BTreeMap<LineNumber, LogRecord>,
    committed: bool,
    lock: StagingLock,
}

impl StagedWrite for FileStagedWrite<'_> {
    fn put_batch(&mut self, records: &[LogRecord]) -> Result<(), StoreError> {
        if let Some(writer) = self.writer.as_mut() {
            write_records(writer, records)?;
        }
        for record in records {
            self.shadow.insert(record.line_number, record.clone());
        }
        self.lock.touch()
    }

    fn staged_len(&self) -> usize {
        self.shadow.len()
    }

    fn commit(mut self: Box<Self>, expected_len: usize) -> Result<(), StoreError> {
        let actual = self.shadow.len();
        if actual != expected_len {
            return Err(StoreError::CountMismatch {
                expected: expected_len,
                actual,
            });
        }

        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }

        if !self.lock.is_held() {
            warn!(path = %self.path.display(), "staging lock was taken over; not swapping");
            return Err(StoreError::StagingActive);
        }

        let shadow = std::mem::take(&mut self.shadow);
        let mut state = self.store.state.write();
        fs::rename(&self.path, self.store.table_path())?;
        state.replace(shadow);
        self.committed = true;

        debug!(records = actual, "swapped staged table into place");
        Ok(())
    }
}

impl Drop for FileStagedWrite<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.writer.take();
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "staged table already gone");
        }
    }
}
