//! Trip data structures: lifecycle phase, intents, and the persisted snapshot.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use bustrack_sync_protocol::{CheckIn, TripRecord, MAX_PASSENGERS};

use crate::error::{Result, TripError};
use crate::route::Route;

/// Where the driver's current trip is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum TripPhase {
    Idle,
    #[serde(rename_all = "camelCase")]
    InProgress { current_stop_index: usize },
    ReadyToEnd,
}

impl TripPhase {
    /// `InProgress` and `ReadyToEnd` both count as an active trip.
    pub fn is_active(&self) -> bool {
        !matches!(self, TripPhase::Idle)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TripPhase::Idle => "idle",
            TripPhase::InProgress { .. } => "in-progress",
            TripPhase::ReadyToEnd => "ready-to-end",
        }
    }
}

impl fmt::Display for TripPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intents that drive the trip lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripAction {
    Start,
    CheckIn,
    End,
    AdjustCount,
    Resume,
    Discard,
}

impl TripAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripAction::Start => "start",
            TripAction::CheckIn => "check-in",
            TripAction::End => "end",
            TripAction::AdjustCount => "adjust-count",
            TripAction::Resume => "resume",
            TripAction::Discard => "discard",
        }
    }
}

impl fmt::Display for TripAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The in-memory trip between start and end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTrip {
    pub route_id: String,
    /// Driver and bus signed in when the trip started.
    pub driver_id: String,
    pub bus_number: String,
    pub start_time: DateTime<Utc>,
    pub check_ins: Vec<CheckIn>,
    pub passengers: u32,
}

impl ActiveTrip {
    /// Always equal to the number of recorded check-ins.
    pub fn current_stop_index(&self) -> usize {
        self.check_ins.len()
    }
}

/// Serialized projection of the active trip, written after every transition.
///
/// The on-disk shape:
///
/// ```json
/// {
///   "active": true,
///   "routeId": "route5",
///   "driverId": "D-7",
///   "busNumber": "101",
///   "startTime": "2026-01-30T08:00:00Z",
///   "currentStopIndex": 3,
///   "checkIns": [ ... ],
///   "passengers": 14
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTripSnapshot {
    pub active: bool,
    pub route_id: String,
    pub driver_id: String,
    pub bus_number: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_stop_index: usize,
    #[serde(default)]
    pub check_ins: Vec<CheckIn>,
    #[serde(default)]
    pub passengers: u32,
}

impl PersistedTripSnapshot {
    pub fn from_active(trip: &ActiveTrip) -> Self {
        Self {
            active: true,
            route_id: trip.route_id.clone(),
            driver_id: trip.driver_id.clone(),
            bus_number: trip.bus_number.clone(),
            start_time: Some(trip.start_time),
            current_stop_index: trip.current_stop_index(),
            check_ins: trip.check_ins.clone(),
            passengers: trip.passengers,
        }
    }

    /// Rebuilds the active trip, checking the snapshot against the route.
    ///
    /// Rejects anything that would break the check-in invariants: an index
    /// that disagrees with the check-in count, stops out of route order,
    /// timestamps running backwards, or a passenger count out of range.
    pub fn to_active(&self, route: &Route) -> Result<ActiveTrip> {
        let corrupt = |reason: String| TripError::CorruptSnapshot { reason };

        if !self.active {
            return Err(corrupt("snapshot is not marked active".to_string()));
        }
        if self.route_id != route.id() {
            return Err(corrupt(format!(
                "snapshot route {} does not match route {}",
                self.route_id,
                route.id()
            )));
        }
        if self.driver_id.trim().is_empty() {
            return Err(corrupt("snapshot has no driver".to_string()));
        }
        let start_time = self
            .start_time
            .ok_or_else(|| corrupt("snapshot has no start time".to_string()))?;
        if self.current_stop_index != self.check_ins.len() {
            return Err(corrupt(format!(
                "stop index {} disagrees with {} check-ins",
                self.current_stop_index,
                self.check_ins.len()
            )));
        }
        if self.current_stop_index > route.total_stops() {
            return Err(corrupt(format!(
                "stop index {} exceeds {} stops",
                self.current_stop_index,
                route.total_stops()
            )));
        }
        if self.passengers > MAX_PASSENGERS {
            return Err(corrupt(format!(
                "passenger count {} out of range",
                self.passengers
            )));
        }

        let mut previous = start_time;
        for (index, check_in) in self.check_ins.iter().enumerate() {
            let expected = route.stop(index).map(|stop| stop.id);
            if expected != Some(check_in.stop_id) {
                return Err(corrupt(format!(
                    "check-in {} is for stop {}, expected {:?}",
                    index, check_in.stop_id, expected
                )));
            }
            if check_in.timestamp < previous {
                return Err(corrupt(format!(
                    "check-in {} predates the previous event",
                    index
                )));
            }
            previous = check_in.timestamp;
        }

        Ok(ActiveTrip {
            route_id: self.route_id.clone(),
            driver_id: self.driver_id.clone(),
            bus_number: self.bus_number.clone(),
            start_time,
            check_ins: self.check_ins.clone(),
            passengers: self.passengers,
        })
    }
}

/// Display summary for the completion screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripSummary {
    pub trip_id: String,
    pub route_name: String,
    pub duration_minutes: i64,
    pub stops_completed: usize,
    pub total_passengers: u32,
}

impl TripSummary {
    pub fn of(trip: &TripRecord) -> Self {
        Self {
            trip_id: trip.id.clone(),
            route_name: trip.route_name.clone(),
            duration_minutes: trip
                .end_time
                .signed_duration_since(trip.start_time)
                .num_minutes(),
            stops_completed: trip.stops.len(),
            total_passengers: trip.total_passengers,
        }
    }
}
