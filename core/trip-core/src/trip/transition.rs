//! Maps trip intents to lifecycle phases.
//! Anything not listed is an invalid transition; the caller's state is untouched.

use super::types::{TripAction, TripPhase};
use crate::error::{Result, TripError};

pub fn next_phase(current: TripPhase, action: TripAction, total_stops: usize) -> Result<TripPhase> {
    let invalid = || TripError::InvalidTransition {
        from: current,
        action,
    };

    match (current, action) {
        (TripPhase::Idle, TripAction::Start) => Ok(after_check_ins(0, total_stops)),
        (TripPhase::InProgress { current_stop_index }, TripAction::CheckIn) => {
            Ok(after_check_ins(current_stop_index + 1, total_stops))
        }
        (TripPhase::ReadyToEnd, TripAction::End) => Ok(TripPhase::Idle),
        (phase, TripAction::AdjustCount) if phase.is_active() => Ok(phase),
        _ => Err(invalid()),
    }
}

/// Phase of an active trip with `count` check-ins recorded.
pub fn after_check_ins(count: usize, total_stops: usize) -> TripPhase {
    if count >= total_stops {
        TripPhase::ReadyToEnd
    } else {
        TripPhase::InProgress {
            current_stop_index: count,
        }
    }
}
