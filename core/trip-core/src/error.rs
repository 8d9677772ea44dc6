//! Error types for trip-core operations.
//!
//! Every failure is returned as a value; nothing here is fatal to the
//! process. The worst case is a failed sync that is retried later.

use crate::sync::DeliveryError;
use crate::trip::{TripAction, TripPhase};

/// All errors that can occur in trip-core operations.
#[derive(Debug, thiserror::Error)]
pub enum TripError {
    // ─────────────────────────────────────────────────────────────────────
    // State Machine Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("invalid transition from state {from} via action {action}")]
    InvalidTransition { from: TripPhase, action: TripAction },

    #[error("An interrupted trip must be resumed or discarded first")]
    RecoveryPending,

    #[error("Persisted trip snapshot is unusable: {reason}")]
    CorruptSnapshot { reason: String },

    #[error("Trip record would be rejected by the receiver: {code}: {message}")]
    InvalidRecord { code: String, message: String },

    // ─────────────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("No driver is signed in")]
    NotSignedIn,

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Complete current trip first")]
    TripInProgress,

    // ─────────────────────────────────────────────────────────────────────
    // Sync Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Sync failed: {source}")]
    SyncFailure {
        #[from]
        source: DeliveryError,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Storage unavailable: {key}: {source}")]
    StorageUnavailable {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl TripError {
    pub fn storage(key: &str, source: std::io::Error) -> Self {
        TripError::StorageUnavailable {
            key: key.to_string(),
            source,
        }
    }

    /// Whether this error means a durable write or read failed.
    ///
    /// The operator has to see these: offline-first durability is the whole
    /// point of the store.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            TripError::StorageUnavailable { .. } | TripError::Json { .. }
        )
    }
}

/// Convenience type alias for Results using TripError.
pub type Result<T> = std::result::Result<T, TripError>;
