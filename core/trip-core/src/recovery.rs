//! Crash recovery for an interrupted trip.
//!
//! On start, a snapshot marked active means the previous process died
//! mid-trip. The operator has to pick one of two resolutions; nothing is
//! chosen on their behalf:
//!
//! - **Resume**: reinstate the stop index and check-ins.
//! - **Discard**: delete the snapshot and return to idle, losing the
//!   interrupted trip's check-ins.
//!
//! A snapshot that cannot be reconciled with the route still produces a
//! prompt, but one that only allows Discard.

use crate::error::{Result, TripError};
use crate::route::Route;
use crate::store::{keys, load_json, KeyValueStore};
use crate::trip::{PersistedTripSnapshot, TripAction, TripMachine, TripPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    Resume,
    Discard,
}

impl RecoveryDecision {
    pub fn action(&self) -> TripAction {
        match self {
            RecoveryDecision::Resume => TripAction::Resume,
            RecoveryDecision::Discard => TripAction::Discard,
        }
    }
}

/// An interrupted trip waiting for the operator's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPrompt {
    snapshot: Option<PersistedTripSnapshot>,
    problem: Option<String>,
}

impl RecoveryPrompt {
    pub fn snapshot(&self) -> Option<&PersistedTripSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn can_resume(&self) -> bool {
        self.problem.is_none() && self.snapshot.is_some()
    }

    pub fn checked_in_stops(&self) -> usize {
        self.snapshot
            .as_ref()
            .map_or(0, |snapshot| snapshot.current_stop_index)
    }

    pub fn message(&self) -> String {
        match &self.problem {
            None => format!(
                "A trip was in progress. Continue from Stop {}?",
                self.checked_in_stops() + 1
            ),
            Some(problem) => format!(
                "Saved trip data is unreadable ({}). It can only be discarded.",
                problem
            ),
        }
    }
}

/// Looks for an interrupted trip. `Ok(None)` when there is nothing to recover.
pub fn detect(store: &impl KeyValueStore, route: &Route) -> Result<Option<RecoveryPrompt>> {
    let snapshot = match load_json::<PersistedTripSnapshot>(store, keys::ACTIVE_TRIP) {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return Ok(None),
        Err(TripError::Json { source, .. }) => {
            tracing::warn!(error = %source, "Active trip snapshot is malformed");
            return Ok(Some(RecoveryPrompt {
                snapshot: None,
                problem: Some(source.to_string()),
            }));
        }
        Err(err) => return Err(err),
    };

    if !snapshot.active {
        return Ok(None);
    }

    let problem = match snapshot.to_active(route) {
        Ok(_) => None,
        Err(TripError::CorruptSnapshot { reason }) => Some(reason),
        Err(err) => return Err(err),
    };
    tracing::info!(
        stop_index = snapshot.current_stop_index,
        resumable = problem.is_none(),
        "Interrupted trip found"
    );

    Ok(Some(RecoveryPrompt {
        snapshot: Some(snapshot),
        problem,
    }))
}

/// Applies the operator's decision. The machine must be idle.
pub fn resolve(
    machine: &mut TripMachine,
    store: &mut impl KeyValueStore,
    prompt: &RecoveryPrompt,
    decision: RecoveryDecision,
) -> Result<TripPhase> {
    if machine.phase().is_active() {
        return Err(TripError::InvalidTransition {
            from: machine.phase(),
            action: decision.action(),
        });
    }

    match decision {
        RecoveryDecision::Resume => {
            let snapshot = match (&prompt.snapshot, &prompt.problem) {
                (Some(snapshot), None) => snapshot,
                (_, Some(problem)) => {
                    return Err(TripError::CorruptSnapshot {
                        reason: problem.clone(),
                    })
                }
                (None, None) => {
                    return Err(TripError::CorruptSnapshot {
                        reason: "no snapshot to resume".to_string(),
                    })
                }
            };
            let phase = machine.restore(snapshot)?;
            tracing::info!(%phase, stop_index = machine.current_stop_index(), "Trip resumed");
            Ok(phase)
        }
        RecoveryDecision::Discard => {
            store.remove(keys::ACTIVE_TRIP)?;
            machine.clear();
            tracing::info!(
                lost_check_ins = prompt.checked_in_stops(),
                "Interrupted trip discarded"
            );
            Ok(TripPhase::Idle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{save_json, MemoryStore};
    use chrono::{Duration, TimeZone, Utc};

    fn snapshot_at(stops: usize) -> PersistedTripSnapshot {
        let route = Route::default();
        let start = Utc.with_ymd_and_hms(2026, 1, 30, 8, 0, 0).unwrap();
        let mut machine = TripMachine::new(route);
        machine.start(start, "D-7", "101").unwrap();
        for n in 0..stops {
            machine
                .check_in_next_stop(start + Duration::minutes(n as i64 + 1))
                .unwrap();
        }
        machine.snapshot().unwrap()
    }

    #[test]
    fn no_snapshot_means_no_prompt() {
        let store = MemoryStore::new();
        assert!(detect(&store, &Route::default()).unwrap().is_none());
    }

    #[test]
    fn inactive_snapshot_means_no_prompt() {
        let mut store = MemoryStore::new();
        let mut snapshot = snapshot_at(2);
        snapshot.active = false;
        save_json(&mut store, keys::ACTIVE_TRIP, &snapshot).unwrap();
        assert!(detect(&store, &Route::default()).unwrap().is_none());
    }

    #[test]
    fn resume_restores_index_and_check_ins() {
        let mut store = MemoryStore::new();
        save_json(&mut store, keys::ACTIVE_TRIP, &snapshot_at(3)).unwrap();
        let prompt = detect(&store, &Route::default()).unwrap().unwrap();
        assert!(prompt.can_resume());
        assert_eq!(prompt.message(), "A trip was in progress. Continue from Stop 4?");

        let mut machine = TripMachine::new(Route::default());
        let phase = resolve(&mut machine, &mut store, &prompt, RecoveryDecision::Resume).unwrap();
        assert_eq!(
            phase,
            TripPhase::InProgress {
                current_stop_index: 3
            }
        );
        assert_eq!(machine.active().unwrap().check_ins.len(), 3);
        assert!(store.contains(keys::ACTIVE_TRIP));
    }

    #[test]
    fn resume_at_last_stop_is_ready_to_end() {
        let mut store = MemoryStore::new();
        save_json(&mut store, keys::ACTIVE_TRIP, &snapshot_at(7)).unwrap();
        let prompt = detect(&store, &Route::default()).unwrap().unwrap();
        let mut machine = TripMachine::new(Route::default());
        let phase = resolve(&mut machine, &mut store, &prompt, RecoveryDecision::Resume).unwrap();
        assert_eq!(phase, TripPhase::ReadyToEnd);
    }

    #[test]
    fn discard_clears_snapshot() {
        let mut store = MemoryStore::new();
        save_json(&mut store, keys::ACTIVE_TRIP, &snapshot_at(3)).unwrap();
        let prompt = detect(&store, &Route::default()).unwrap().unwrap();
        let mut machine = TripMachine::new(Route::default());
        let phase = resolve(&mut machine, &mut store, &prompt, RecoveryDecision::Discard).unwrap();
        assert_eq!(phase, TripPhase::Idle);
        assert!(!store.contains(keys::ACTIVE_TRIP));
        assert!(detect(&store, &Route::default()).unwrap().is_none());
    }

    #[test]
    fn malformed_snapshot_can_only_be_discarded() {
        let mut store = MemoryStore::new();
        store.put(keys::ACTIVE_TRIP, "{\"active\": tru").unwrap();
        let prompt = detect(&store, &Route::default()).unwrap().unwrap();
        assert!(!prompt.can_resume());

        let mut machine = TripMachine::new(Route::default());
        assert!(matches!(
            resolve(&mut machine, &mut store, &prompt, RecoveryDecision::Resume),
            Err(TripError::CorruptSnapshot { .. })
        ));
        resolve(&mut machine, &mut store, &prompt, RecoveryDecision::Discard).unwrap();
        assert!(!store.contains(keys::ACTIVE_TRIP));
    }

    #[test]
    fn inconsistent_snapshot_can_only_be_discarded() {
        let mut store = MemoryStore::new();
        let mut snapshot = snapshot_at(3);
        snapshot.current_stop_index = 5;
        save_json(&mut store, keys::ACTIVE_TRIP, &snapshot).unwrap();
        let prompt = detect(&store, &Route::default()).unwrap().unwrap();
        assert!(!prompt.can_resume());
        assert!(prompt.message().contains("can only be discarded"));
    }

    #[test]
    fn discard_failure_is_reported() {
        let mut store = MemoryStore::new();
        save_json(&mut store, keys::ACTIVE_TRIP, &snapshot_at(1)).unwrap();
        let prompt = detect(&store, &Route::default()).unwrap().unwrap();
        store.set_unavailable(true);
        let mut machine = TripMachine::new(Route::default());
        let err = resolve(&mut machine, &mut store, &prompt, RecoveryDecision::Discard).unwrap_err();
        assert!(err.is_storage());
    }
}
