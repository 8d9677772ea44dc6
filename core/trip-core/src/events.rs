//! Notifications emitted by the core for the presentation layer.
//!
//! The core never renders. It appends [`CoreEvent`]s to an outbox that the
//! presentation drains after each intent and turns into toasts, sounds, or
//! redraws.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sync::DeferReason;
use crate::trip::TripSummary;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreEvent {
    TripStarted {
        at: DateTime<Utc>,
    },
    StopReached {
        stop_name: String,
        index: usize,
        total: usize,
    },
    TripCompleted {
        summary: TripSummary,
    },
    PassengerCountChanged {
        count: u32,
    },
    SyncSucceeded {
        delivered: usize,
        at: DateTime<Utc>,
    },
    SyncFailed {
        reason: String,
    },
    SyncDeferred {
        reason: DeferReason,
    },
    RecoveryRequired {
        message: String,
    },
    TripResumed {
        current_stop_index: usize,
    },
    TripDiscarded,
    SettingsSaved,
    HistoryPurged {
        removed: usize,
    },
}

impl CoreEvent {
    /// One-line operator message, if this event warrants one.
    pub fn toast(&self) -> Option<String> {
        match self {
            CoreEvent::TripStarted { .. } => Some("Trip Started!".to_string()),
            CoreEvent::StopReached {
                stop_name,
                index,
                total,
            } => Some(format!("{} ✓ ({}/{})", stop_name, index, total)),
            CoreEvent::TripCompleted { summary } => Some(format!(
                "Trip complete: {} stops in {} min",
                summary.stops_completed, summary.duration_minutes
            )),
            CoreEvent::PassengerCountChanged { .. } => None,
            CoreEvent::SyncSucceeded { .. } => Some("Data synced successfully!".to_string()),
            CoreEvent::SyncFailed { .. } => Some("Sync failed - will retry later".to_string()),
            CoreEvent::SyncDeferred { reason } => Some(format!("Sync postponed: {}", reason)),
            CoreEvent::RecoveryRequired { message } => Some(message.clone()),
            CoreEvent::TripResumed { current_stop_index } => {
                Some(format!("Resumed at stop {}", current_stop_index + 1))
            }
            CoreEvent::TripDiscarded => Some("Interrupted trip discarded".to_string()),
            CoreEvent::SettingsSaved => Some("Setting saved".to_string()),
            CoreEvent::HistoryPurged { removed } => {
                Some(format!("Old data cleared ({} trips)", removed))
            }
        }
    }
}
