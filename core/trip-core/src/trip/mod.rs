//! Driver trip lifecycle.
//!
//! ```text
//! Idle ──start──▶ InProgress(i < N) ──check-in──▶ … ──▶ ReadyToEnd(i == N) ──end──▶ Idle
//! ```
//!
//! - [`transition`]: pure phase table, the single source of valid moves
//! - [`machine`]: [`TripMachine`], which applies intents to the active trip
//! - [`types`]: phases, intents, the persisted snapshot, finalized records

mod machine;
pub mod transition;
mod types;

pub use machine::TripMachine;
pub use types::{
    ActiveTrip, CheckIn, PersistedTripSnapshot, TripAction, TripPhase, TripRecord, TripSummary,
    MAX_PASSENGERS,
};
