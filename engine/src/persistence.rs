//! Durable storage of session state.
//!
//! This module handles:
//! - The [`DurableStore`] key/value seam and its file and in-memory backends
//! - [`Persisted<T>`], which remembers what is already in storage and skips
//!   writes that would not change it
//!
//! Write failures are logged and swallowed: losing one autosave must never
//! interrupt a conversation.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hearth_utils::{SyncPolicy, WriteOptions, atomic_write_with_options, recover_bak_file};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub const SESSIONS_KEY: &str = "hearth.sessions";
pub const ACTIVE_SESSION_KEY: &str = "hearth.active";
pub const SELECTED_MODEL_KEY: &str = "hearth.model";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Synchronous string key/value storage.
pub trait DurableStore: Send {
    fn read(&self, key: &str) -> Result<Option<String>, PersistError>;
    fn write(&self, key: &str, value: &str) -> Result<(), PersistError>;

    /// Force earlier writes to stable storage. Backends that write durably
    /// every time have nothing to do.
    fn flush(&self) -> Result<(), PersistError> {
        Ok(())
    }
}

/// One JSON file per key under a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    options: WriteOptions,
    /// Keys written without `fsync` since the last [`flush`](DurableStore::flush).
    unsynced: Arc<Mutex<BTreeSet<String>>>,
}

impl FileStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            options: WriteOptions::default(),
            unsynced: Arc::default(),
        }
    }

    /// Skip `fsync` on writes. Call [`flush`](DurableStore::flush) to make
    /// them durable.
    #[must_use]
    pub fn without_sync(mut self) -> Self {
        self.options.sync = SyncPolicy::Fast;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Number of keys awaiting a [`flush`](DurableStore::flush).
    #[must_use]
    pub fn unsynced_count(&self) -> usize {
        self.unsynced_keys().len()
    }

    fn unsynced_keys(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.unsynced.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DurableStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>, PersistError> {
        let path = self.path_for(key);
        recover_bak_file(&path);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistError::Read {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), PersistError> {
        let write_err = |source| PersistError::Write {
            key: key.to_string(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(write_err)?;
        atomic_write_with_options(self.path_for(key), value.as_bytes(), self.options)
            .map_err(write_err)?;
        if self.options.sync == SyncPolicy::Fast {
            self.unsynced_keys().insert(key.to_string());
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), PersistError> {
        let keys = std::mem::take(&mut *self.unsynced_keys());
        let mut first_err = None;
        for key in keys {
            let synced = fs::File::open(self.path_for(&key)).and_then(|file| file.sync_all());
            if let Err(source) = synced {
                tracing::warn!(key = %key, "Failed to sync stored value: {source}");
                if first_err.is_none() {
                    first_err = Some(PersistError::Write { key, source });
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    values: HashMap<String, String>,
    writes: usize,
    flushes: usize,
    failing: bool,
}

/// Shared in-memory store. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a value without counting it as a write.
    pub fn seed(&self, key: &str, value: impl Into<String>) {
        self.lock().values.insert(key.to_string(), value.into());
    }

    #[must_use]
    pub fn value(&self, key: &str) -> Option<String> {
        self.lock().values.get(key).cloned()
    }

    /// Number of successful writes since creation.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// Number of [`flush`](DurableStore::flush) calls since creation.
    #[must_use]
    pub fn flushes(&self) -> usize {
        self.lock().flushes
    }

    /// Make subsequent writes fail.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }
}

impl DurableStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, PersistError> {
        Ok(self.value(key))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), PersistError> {
        let mut inner = self.lock();
        if inner.failing {
            return Err(PersistError::Unavailable(format!("write to {key} rejected")));
        }
        inner.values.insert(key.to_string(), value.to_string());
        inner.writes += 1;
        Ok(())
    }

    fn flush(&self) -> Result<(), PersistError> {
        self.lock().flushes += 1;
        Ok(())
    }
}

/// A value mirrored to one storage key.
///
/// Tracks the serialized form last known to be in storage. [`sync`](Self::sync)
/// writes only when the current value serializes differently, so seeding a
/// value from storage never writes it straight back.
#[derive(Debug)]
pub struct Persisted<T> {
    key: &'static str,
    value: T,
    last_written: Option<String>,
}

impl<T: Serialize + DeserializeOwned> Persisted<T> {
    /// Load `key`, falling back to `fallback()` when absent or unreadable.
    pub fn load(store: &dyn DurableStore, key: &'static str, fallback: impl FnOnce() -> T) -> Self {
        let value = match store.read(key) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(key, "Discarding unreadable stored value: {e}");
                    fallback()
                }
            },
            Ok(None) => fallback(),
            Err(e) => {
                tracing::warn!(key, "Failed to read stored value: {e}");
                fallback()
            }
        };
        let last_written = serde_json::to_string(&value).ok();
        Self {
            key,
            value,
            last_written,
        }
    }

    #[must_use]
    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
    }

    #[must_use]
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Write the value if it differs from storage. Returns `true` if a write happened.
    pub fn sync(&mut self, store: &dyn DurableStore) -> bool {
        let serialized = match serde_json::to_string(&self.value) {
            Ok(serialized) => serialized,
            Err(e) => {
                tracing::warn!(key = self.key, "Failed to serialize value: {e}");
                return false;
            }
        };
        if self.last_written.as_deref() == Some(serialized.as_str()) {
            return false;
        }
        match store.write(self.key, &serialized) {
            Ok(()) => {
                self.last_written = Some(serialized);
                true
            }
            Err(e) => {
                tracing::warn!(key = self.key, "Autosave failed: {e}");
                false
            }
        }
    }
}
