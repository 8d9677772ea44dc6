//! Key-value persistence for driver state.
//!
//! Each key holds one JSON document. The file-backed store keeps one file per
//! key under `StorageConfig::store_dir()`:
//!
//! ```text
//! ~/.bustrack/store/
//!   active_trip.json      in-progress trip snapshot
//!   pending_sync.json     finalized trips awaiting delivery
//!   last_sync.json        RFC 3339 timestamp of the last confirmed flush
//!   driver_data.json      remembered driver identity
//!   driver_settings.json  operator settings
//!   trip_history.json     delivered trips
//! ```
//!
//! # Atomic Writes
//!
//! Writes go to a temp file in the same directory and are renamed into place,
//! so a crash mid-write leaves either the old or the new document, never a
//! torn one.
//!
//! # Reads
//!
//! A missing or empty file reads as "no value". Malformed JSON is reported by
//! [`load_json`] so callers can decide between falling back to defaults and
//! surfacing the problem.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs_err as fs;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{Result, TripError};

/// Well-known store keys.
pub mod keys {
    pub const ACTIVE_TRIP: &str = "active_trip";
    pub const PENDING_SYNC: &str = "pending_sync";
    pub const LAST_SYNC: &str = "last_sync";
    pub const DRIVER_DATA: &str = "driver_data";
    pub const DRIVER_SETTINGS: &str = "driver_settings";
    pub const TRIP_HISTORY: &str = "trip_history";
    pub const SYNC_FAILURES: &str = "sync_failures";
    pub const PENDING_CHANGES: &str = "pending_changes";
    pub const CHANGES_LAST_SYNC: &str = "changes_last_sync";
}

/// Minimal durable key-value interface the trip core is written against.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// Reads and decodes a JSON document. `Ok(None)` when the key is absent.
pub fn load_json<T: DeserializeOwned>(store: &impl KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| TripError::Json {
                context: format!("decoding {}", key),
                source,
            }),
        None => Ok(None),
    }
}

/// Encodes and writes a JSON document.
pub fn save_json<T: Serialize>(store: &mut impl KeyValueStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).map_err(|source| TripError::Json {
        context: format!("encoding {}", key),
        source,
    })?;
    store.put(key, &raw)
}

/// Like [`load_json`], but a malformed document falls back to `T::default()`
/// with a warning. Used for settings and identity, where a corrupt file must
/// not lock the operator out.
pub fn load_json_or_default<T: DeserializeOwned + Default>(
    store: &impl KeyValueStore,
    key: &str,
) -> Result<T> {
    match load_json(store, key) {
        Ok(value) => Ok(value.unwrap_or_default()),
        Err(TripError::Json { source, .. }) => {
            tracing::warn!(key, error = %source, "Malformed stored value, using defaults");
            Ok(T::default())
        }
        Err(err) => Err(err),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File-backed store
// ─────────────────────────────────────────────────────────────────────────────

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (and creates, if needed) a store rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|source| TripError::storage("<store dir>", source))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(TripError::storage(
                key,
                io::Error::new(io::ErrorKind::InvalidInput, "invalid store key"),
            ));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Ok(None),
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(TripError::storage(key, err)),
        }
    }

    fn put(&mut self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let mut temp_file =
            NamedTempFile::new_in(&self.dir).map_err(|err| TripError::storage(key, err))?;
        temp_file
            .write_all(value.as_bytes())
            .map_err(|err| TripError::storage(key, err))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|err| TripError::storage(key, err))?;
        temp_file
            .persist(&path)
            .map_err(|err| TripError::storage(key, err.error))?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(TripError::storage(key, err)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────────────────

/// Volatile store for tests and previews.
///
/// `set_unavailable(true)` makes every write fail, standing in for a full
/// disk or revoked storage permission.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, String>,
    unavailable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if self.unavailable {
            return Err(TripError::storage(
                key,
                io::Error::other("storage marked unavailable"),
            ));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> Result<()> {
        self.check_writable(key)?;
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.check_writable(key)?;
        self.values.remove(key);
        Ok(())
    }
}
