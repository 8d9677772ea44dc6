//! Storage configuration and path management for bustrack.
//!
//! All file paths used by the driver console and the sync receiver are
//! derived here. Production code uses [`StorageConfig::from_env`], which
//! points at `~/.bustrack/` unless `BUSTRACK_HOME` overrides it. Tests use
//! [`StorageConfig::with_root`] with a temp directory.

use std::env;
use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "BUSTRACK_HOME";
pub const SOCKET_ENV: &str = "BUSTRACK_SYNC_SOCKET";
const DEFAULT_DIR_NAME: &str = ".bustrack";
const SOCKET_NAME: &str = "sync.sock";

/// Central configuration for all bustrack storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for all bustrack data (default: ~/.bustrack)
    root: PathBuf,
}

impl StorageConfig {
    /// Resolves the data root from `BUSTRACK_HOME`, falling back to
    /// `~/.bustrack`. Returns `None` when neither is available.
    pub fn from_env() -> Option<Self> {
        if let Ok(path) = env::var(HOME_ENV) {
            if !path.trim().is_empty() {
                return Some(Self::with_root(PathBuf::from(path)));
            }
        }
        dirs::home_dir().map(|home| Self::with_root(home.join(DEFAULT_DIR_NAME)))
    }

    /// Creates a StorageConfig with a custom root directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Driver Console
    // ─────────────────────────────────────────────────────────────────────────────

    /// Directory holding one JSON document per store key.
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    /// Directory for rolling log files.
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Sync Receiver
    // ─────────────────────────────────────────────────────────────────────────────

    /// Socket the sync receiver listens on. `BUSTRACK_SYNC_SOCKET` wins.
    pub fn sync_socket(&self) -> PathBuf {
        match env::var(SOCKET_ENV) {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => self.root.join(SOCKET_NAME),
        }
    }

    /// SQLite database of received trips and changes.
    pub fn sync_db_file(&self) -> PathBuf {
        self.root.join("sync").join("received.db")
    }

    /// Startup backoff bookkeeping for the receiver.
    pub fn sync_backoff_file(&self) -> PathBuf {
        self.root.join("sync").join("daemon-backoff.json")
    }
}
