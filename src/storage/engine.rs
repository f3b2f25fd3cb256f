//! Thread-Safe Storage Engine with Crash-Safe Persistence
//!
//! This module implements the dictionary that every connection reads and
//! writes, together with its statistics and the dump-to-file routine.
//!
//! ## Design Decisions
//!
//! 1. **One RwLock for the dictionary**: `get` and the dump snapshot take a
//!    read lock, `set` takes the write lock. Concurrent `set`s on the same key
//!    are serialized there and the last writer wins.
//! 2. **Statistics outside the dictionary lock**: per-key counters live in
//!    [`KeyStats`] and global counters are plain atomics, so counting never
//!    waits on dictionary access.
//! 3. **Snapshot, then write**: the dump copies the dictionary under a read
//!    lock and serializes the copy, so no lock is held during file I/O.
//! 4. **Write-to-temp, then rename**: the primary file is replaced by an atomic
//!    rename, so it always holds a complete snapshot.
//!
//! ## Dump Sequence
//!
//! ```text
//! dirty.swap(false) ──false──> Skipped
//!        │
//!       true
//!        ▼
//! read lock ─> clone ─> unlock
//!        │
//!        ▼
//! write <path>.tmp ─> fsync ─> close
//!        │
//!        ▼
//! rename(<path>.tmp, <path>) ─> Done
//! ```
//!
//! A crash between the temp write and the rename leaves `<path>.tmp` behind.
//! [`StorageEngine::load`] refuses to start while that file exists. A dump
//! that fails without crashing removes its temp file.
//!
//! An engine built with [`StorageEngine::persist_on_drop`] dumps once more when
//! its last strong reference goes away, so a `set` that finishes after the
//! server's final dump still reaches disk.

use crate::storage::stats::{AtomicStat, KeyStats, Op, Stat};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, error, info};

/// Suffix appended to the dictionary path for in-progress dumps.
pub const TMP_SUFFIX: &str = ".tmp";

/// Errors raised while loading or dumping the dictionary file.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A temp file from an interrupted dump is still on disk
    #[error(
        "{0} exists at start, the previous run did not finish a dump; fix it manually and restart"
    )]
    LeftoverTempFile(PathBuf),

    /// The dictionary file does not exist
    #[error("dictionary file {0} does not exist")]
    MissingFile(PathBuf),

    /// The dictionary file is not a JSON object
    #[error("dictionary file is not a JSON object")]
    NotAnObject,

    /// A value in the dictionary file is not a string
    #[error("dictionary value for key {0:?} is not a string")]
    NonStringValue(String),

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a [`StorageEngine::dump`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpOutcome {
    /// The dictionary was written to disk
    Done,
    /// Nothing changed since the last dump
    Skipped,
}

/// Lifetime and current-period totals, as returned by
/// [`StorageEngine::take_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    pub lifetime: Stat,
    pub period: Stat,
}

/// The shared dictionary.
///
/// Wrap it in an `Arc` and hand out `Weak` handles to connections; see
/// [`crate::commands::CommandHandler`].
///
/// # Example
///
/// ```
/// use dictkv::storage::StorageEngine;
///
/// let engine = StorageEngine::new("dictionary.json");
/// let stat = engine.set("name", "Ariz");
/// assert_eq!(stat.set_count, 1);
///
/// let (value, stat) = engine.get("name");
/// assert_eq!(value.as_deref(), Some("Ariz"));
/// assert_eq!(stat.get_count, 1);
/// ```
pub struct StorageEngine {
    /// Key -> value
    dictionary: RwLock<HashMap<String, String>>,

    /// Per-key counters, never evicted
    key_stats: KeyStats,

    /// Counters since start-up
    lifetime: AtomicStat,

    /// Counters since the last `take_stats`
    period: AtomicStat,

    /// Set by every `set`, cleared by the dump that persists it
    dirty: AtomicBool,

    /// Primary dictionary file
    path: PathBuf,

    /// Dump on drop
    persist_on_drop: bool,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("path", &self.path)
            .field("keys", &self.len())
            .field("dirty", &self.dirty.load(Ordering::Relaxed))
            .field("lifetime", &self.lifetime.load())
            .finish()
    }
}

impl StorageEngine {
    /// Creates an empty engine that dumps to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_entries(path, HashMap::new())
    }

    /// Creates an engine pre-populated with `entries`. The entries are
    /// considered already persisted.
    pub fn with_entries(path: impl Into<PathBuf>, entries: HashMap<String, String>) -> Self {
        Self {
            dictionary: RwLock::new(entries),
            key_stats: KeyStats::new(),
            lifetime: AtomicStat::new(),
            period: AtomicStat::new(),
            dirty: AtomicBool::new(false),
            path: path.into(),
            persist_on_drop: false,
        }
    }

    /// Makes the engine dump pending changes when it is dropped.
    ///
    /// Errors from that dump are logged, not returned.
    pub fn persist_on_drop(mut self, enabled: bool) -> Self {
        self.persist_on_drop = enabled;
        self
    }

    /// Loads the dictionary from `path`.
    ///
    /// # Errors
    ///
    /// Every error is a start-up condition the operator must fix:
    /// a leftover `<path>.tmp`, a missing file, a file that is not a JSON
    /// object, or an object with a non-string value.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();

        let tmp = tmp_path(&path);
        if tmp.exists() {
            return Err(StorageError::LeftoverTempFile(tmp));
        }
        if !path.exists() {
            return Err(StorageError::MissingFile(path));
        }

        let contents = fs::read_to_string(&path)?;
        let document: serde_json::Value = serde_json::from_str(&contents)?;
        let object = match document {
            serde_json::Value::Object(object) => object,
            _ => return Err(StorageError::NotAnObject),
        };

        let mut entries = HashMap::with_capacity(object.len());
        for (key, value) in object {
            match value {
                serde_json::Value::String(value) => {
                    entries.insert(key, value);
                }
                _ => return Err(StorageError::NonStringValue(key)),
            }
        }

        info!(path = %path.display(), keys = entries.len(), "Dictionary loaded");
        Ok(Self::with_entries(path, entries))
    }

    /// Looks up `key`.
    ///
    /// The key's get counter and both global get counters are bumped first;
    /// the returned [`Stat`] includes that bump. A missing key is not added to
    /// the dictionary, though it does get a per-key counter entry.
    pub fn get(&self, key: &str) -> (Option<String>, Stat) {
        let stat = self.record(key, Op::Get);

        let dictionary = self
            .dictionary
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        (dictionary.get(key).cloned(), stat)
    }

    /// Inserts or overwrites `key` and marks the dictionary dirty.
    ///
    /// Returns the key's counters including this set.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) -> Stat {
        let key = key.into();
        let stat = self.record(&key, Op::Set);

        let mut dictionary = self
            .dictionary
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        dictionary.insert(key, value.into());
        self.dirty.store(true, Ordering::Release);

        stat
    }

    fn record(&self, key: &str, op: Op) -> Stat {
        let stat = self.key_stats.record(key, op);
        self.lifetime.record(op);
        self.period.record(op);
        stat
    }

    /// Per-key counters for `key`, if it was ever touched.
    pub fn key_stat(&self, key: &str) -> Option<Stat> {
        self.key_stats.get(key)
    }

    /// Returns the lifetime totals unchanged and the period totals, resetting
    /// the period to zero.
    pub fn take_stats(&self) -> StatsReport {
        StatsReport {
            lifetime: self.lifetime.load(),
            period: self.period.take(),
        }
    }

    /// Persists the dictionary to its configured path.
    pub fn dump(&self) -> Result<DumpOutcome, StorageError> {
        self.dump_to(&self.path)
    }

    /// Persists the dictionary to `path` if it changed since the last dump.
    ///
    /// Only one caller proceeds per dirty period: the flag is tested and
    /// cleared in a single atomic swap. If writing fails the flag is raised
    /// again so a later call retries.
    pub fn dump_to(&self, path: &Path) -> Result<DumpOutcome, StorageError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(DumpOutcome::Skipped);
        }

        let snapshot = self.snapshot();
        let tmp = tmp_path(path);

        let result = write_snapshot(&tmp, &snapshot).and_then(|()| commit(&tmp, path));
        if let Err(e) = result {
            discard(&tmp);
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }

        debug!(path = %path.display(), keys = snapshot.len(), "Dictionary dumped");
        Ok(DumpOutcome::Done)
    }

    /// Copies the dictionary under a read lock, sorted by key.
    fn snapshot(&self) -> BTreeMap<String, String> {
        let dictionary = self
            .dictionary
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        dictionary
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Whether there are mutations not yet on disk.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Number of keys in the dictionary.
    pub fn len(&self) -> usize {
        self.dictionary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The primary dictionary file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        if !self.persist_on_drop {
            return;
        }
        match self.dump() {
            Ok(DumpOutcome::Done) => {
                info!(path = %self.path.display(), "Dictionary dumped on drop")
            }
            Ok(DumpOutcome::Skipped) => {}
            Err(e) => error!(path = %self.path.display(), error = %e, "Dump on drop failed"),
        }
    }
}

/// `<path>.tmp`
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    PathBuf::from(tmp)
}

/// Serializes `snapshot` to `tmp` and syncs it to disk.
fn write_snapshot(tmp: &Path, snapshot: &BTreeMap<String, String>) -> Result<(), StorageError> {
    let file = File::create(tmp)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, snapshot)?;
    writer.flush()?;

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

/// Atomically replaces `path` with `tmp`.
fn commit(tmp: &Path, path: &Path) -> Result<(), StorageError> {
    fs::rename(tmp, path)?;
    Ok(())
}

/// Removes the temp file of a failed dump so the next start-up is not refused.
fn discard(tmp: &Path) {
    match fs::remove_file(tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => error!(path = %tmp.display(), error = %e, "Failed to remove temp file"),
    }
}
