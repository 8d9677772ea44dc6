//! The driver's trip state machine.
//!
//! Pure in-memory logic: no storage, no clock. Callers pass `now` and persist
//! [`TripMachine::snapshot`] after each successful call.
//!
//! Recorded times never run backwards. A `now` earlier than the trip's last
//! recorded time is clamped to it, so a wall clock stepping back mid-trip
//! still yields a record the receiver accepts.

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use ulid::Ulid;

use super::transition::{after_check_ins, next_phase};
use super::types::{
    ActiveTrip, CheckIn, PersistedTripSnapshot, TripAction, TripPhase, TripRecord, MAX_PASSENGERS,
};
use crate::error::{Result, TripError};
use crate::route::Route;

#[derive(Debug, Clone)]
pub struct TripMachine {
    route: Route,
    active: Option<ActiveTrip>,
}

impl TripMachine {
    pub fn new(route: Route) -> Self {
        Self {
            route,
            active: None,
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn active(&self) -> Option<&ActiveTrip> {
        self.active.as_ref()
    }

    pub fn phase(&self) -> TripPhase {
        match &self.active {
            None => TripPhase::Idle,
            Some(trip) => after_check_ins(trip.current_stop_index(), self.route.total_stops()),
        }
    }

    pub fn current_stop_index(&self) -> usize {
        self.active
            .as_ref()
            .map_or(0, ActiveTrip::current_stop_index)
    }

    pub fn passengers(&self) -> u32 {
        self.active.as_ref().map_or(0, |trip| trip.passengers)
    }

    fn transition(&self, action: TripAction) -> Result<TripPhase> {
        next_phase(self.phase(), action, self.route.total_stops())
    }

    /// Latest time already recorded on the active trip.
    fn not_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let floor = self.active.as_ref().map(|trip| {
            trip.check_ins
                .last()
                .map_or(trip.start_time, |check_in| check_in.timestamp)
        });
        floor.map_or(now, |floor| now.max(floor))
    }

    pub fn start(&mut self, now: DateTime<Utc>, driver_id: &str, bus_number: &str) -> Result<()> {
        self.transition(TripAction::Start)?;
        self.active = Some(ActiveTrip {
            route_id: self.route.id().to_string(),
            driver_id: driver_id.to_string(),
            bus_number: bus_number.to_string(),
            start_time: now,
            check_ins: Vec::new(),
            passengers: 0,
        });
        Ok(())
    }

    /// Records arrival at the next stop in route order.
    pub fn check_in_next_stop(&mut self, now: DateTime<Utc>) -> Result<CheckIn> {
        self.transition(TripAction::CheckIn)?;
        let index = self.current_stop_index();
        let stop = self
            .route
            .stop(index)
            .ok_or(TripError::InvalidTransition {
                from: self.phase(),
                action: TripAction::CheckIn,
            })?;
        let check_in = CheckIn {
            stop_id: stop.id,
            stop_name: stop.name.clone(),
            timestamp: self.not_before(now),
            passengers_at_check_in: self.passengers(),
        };
        if let Some(trip) = self.active.as_mut() {
            trip.check_ins.push(check_in.clone());
        }
        Ok(check_in)
    }

    /// Finalizes the trip and returns to idle.
    pub fn end(&mut self, now: DateTime<Utc>) -> Result<TripRecord> {
        self.transition(TripAction::End)?;
        let now = self.not_before(now);
        let trip = self.active.take().ok_or(TripError::InvalidTransition {
            from: TripPhase::Idle,
            action: TripAction::End,
        })?;
        Ok(TripRecord {
            id: Ulid::from_datetime(SystemTime::from(now)).to_string(),
            route_id: trip.route_id,
            route_name: self.route.name().to_string(),
            bus_number: trip.bus_number,
            driver_id: trip.driver_id,
            start_time: trip.start_time,
            end_time: now,
            stops: trip.check_ins,
            total_passengers: trip.passengers,
            synced: false,
        })
    }

    /// Adds `delta` to the passenger count, clamped to `[0, 100]`.
    pub fn adjust_count(&mut self, delta: i32) -> Result<u32> {
        self.transition(TripAction::AdjustCount)?;
        let current = i64::from(self.passengers());
        let clamped = (current + i64::from(delta)).clamp(0, i64::from(MAX_PASSENGERS));
        self.store_count(clamped as u32)
    }

    /// Sets the passenger count, clamped to `[0, 100]`.
    pub fn set_count(&mut self, value: u32) -> Result<u32> {
        self.transition(TripAction::AdjustCount)?;
        self.store_count(value.min(MAX_PASSENGERS))
    }

    fn store_count(&mut self, value: u32) -> Result<u32> {
        if let Some(trip) = self.active.as_mut() {
            trip.passengers = value;
        }
        Ok(value)
    }

    pub fn snapshot(&self) -> Option<PersistedTripSnapshot> {
        self.active.as_ref().map(PersistedTripSnapshot::from_active)
    }

    /// Reinstates an interrupted trip. Only valid while idle.
    pub fn restore(&mut self, snapshot: &PersistedTripSnapshot) -> Result<TripPhase> {
        if self.phase().is_active() {
            return Err(TripError::InvalidTransition {
                from: self.phase(),
                action: TripAction::Resume,
            });
        }
        self.active = Some(snapshot.to_active(&self.route)?);
        Ok(self.phase())
    }

    /// Drops any active trip without finalizing it.
    pub fn clear(&mut self) {
        self.active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 30, 8, 0, 0).unwrap()
    }

    fn started() -> TripMachine {
        let mut machine = TripMachine::new(Route::default());
        machine.start(t0(), "D-1", "101").unwrap();
        machine
    }

    #[test]
    fn test_check_ins_follow_route_order() {
        let mut machine = started();
        for n in 1..=7 {
            machine
                .check_in_next_stop(t0() + Duration::minutes(n))
                .unwrap();
            assert_eq!(machine.current_stop_index(), n as usize);
        }
        let ids: Vec<u32> = machine
            .active()
            .unwrap()
            .check_ins
            .iter()
            .map(|c| c.stop_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(machine.phase(), TripPhase::ReadyToEnd);
    }

    #[test]
    fn test_check_in_from_idle_leaves_state_unchanged() {
        let mut machine = TripMachine::new(Route::default());
        let err = machine.check_in_next_stop(t0()).unwrap_err();
        assert!(matches!(err, TripError::InvalidTransition { .. }));
        assert_eq!(machine.phase(), TripPhase::Idle);
        assert!(machine.snapshot().is_none());
    }

    #[test]
    fn test_end_requires_every_stop() {
        let mut machine = started();
        machine.check_in_next_stop(t0()).unwrap();
        assert!(machine.end(t0()).is_err());
        assert_eq!(machine.current_stop_index(), 1);
    }

    #[test]
    fn test_end_builds_unsynced_record() {
        let mut machine = started();
        machine.set_count(9).unwrap();
        for n in 1..=7 {
            machine
                .check_in_next_stop(t0() + Duration::minutes(n * 5))
                .unwrap();
        }
        let record = machine
            .end(t0() + Duration::minutes(40))
            .unwrap();
        assert_eq!(record.stops.len(), 7);
        assert!(!record.synced);
        assert_eq!(record.total_passengers, 9);
        assert_eq!(record.route_name, "Engineering Loop");
        assert!(record.validate().is_ok());
        assert_eq!(machine.phase(), TripPhase::Idle);
    }

    #[test]
    fn test_count_is_clamped() {
        let mut machine = started();
        assert_eq!(machine.adjust_count(-5).unwrap(), 0);
        assert_eq!(machine.adjust_count(150).unwrap(), 100);
        assert_eq!(machine.set_count(400).unwrap(), 100);
    }

    #[test]
    fn test_count_applies_to_next_check_in_only() {
        let mut machine = started();
        machine.set_count(4).unwrap();
        machine.check_in_next_stop(t0()).unwrap();
        machine.set_count(11).unwrap();
        let second = machine.check_in_next_stop(t0()).unwrap();
        let trip = machine.active().unwrap();
        assert_eq!(trip.check_ins[0].passengers_at_check_in, 4);
        assert_eq!(second.passengers_at_check_in, 11);
    }

    #[test]
    fn test_count_requires_active_trip() {
        let mut machine = TripMachine::new(Route::default());
        assert!(machine.adjust_count(1).is_err());
        assert!(machine.set_count(1).is_err());
    }

    #[test]
    fn test_restart_clears_previous_trip_data() {
        let mut machine = started();
        machine.set_count(30).unwrap();
        for _ in 0..7 {
            machine.check_in_next_stop(t0()).unwrap();
        }
        machine.end(t0()).unwrap();
        machine.start(t0() + Duration::hours(1), "D-1", "101").unwrap();
        assert_eq!(machine.passengers(), 0);
        assert_eq!(machine.current_stop_index(), 0);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut machine = started();
        for n in 1..=3 {
            machine
                .check_in_next_stop(t0() + Duration::minutes(n))
                .unwrap();
        }
        let snapshot = machine.snapshot().unwrap();
        assert_eq!(snapshot.current_stop_index, 3);

        let mut fresh = TripMachine::new(Route::default());
        let phase = fresh.restore(&snapshot).unwrap();
        assert_eq!(
            phase,
            TripPhase::InProgress {
                current_stop_index: 3
            }
        );
        assert_eq!(fresh.active(), machine.active());
    }

    #[test]
    fn test_record_carries_driver_from_start() {
        let mut machine = TripMachine::new(Route::default());
        machine.start(t0(), "D-42", "214").unwrap();
        for _ in 0..7 {
            machine.check_in_next_stop(t0()).unwrap();
        }
        let record = machine.end(t0()).unwrap();
        assert_eq!(record.driver_id, "D-42");
        assert_eq!(record.bus_number, "214");
    }

    #[test]
    fn test_clock_stepping_back_is_clamped() {
        let mut machine = started();
        machine
            .check_in_next_stop(t0() + Duration::minutes(5))
            .unwrap();
        let second = machine
            .check_in_next_stop(t0() + Duration::minutes(3))
            .unwrap();
        assert_eq!(second.timestamp, t0() + Duration::minutes(5));
        for _ in 0..5 {
            machine.check_in_next_stop(t0() - Duration::hours(1)).unwrap();
        }

        let record = machine.end(t0() - Duration::hours(2)).unwrap();
        assert_eq!(record.end_time, t0() + Duration::minutes(5));
        assert!(record.validate().is_ok());

        let mut restored = TripMachine::new(Route::default());
        restored.start(t0(), "D-1", "101").unwrap();
        restored
            .check_in_next_stop(t0() - Duration::minutes(10))
            .unwrap();
        let snapshot = restored.snapshot().unwrap();
        assert_eq!(snapshot.check_ins[0].timestamp, t0());
        assert!(TripMachine::new(Route::default()).restore(&snapshot).is_ok());
    }

    #[test]
    fn test_restore_rejects_snapshot_without_driver() {
        let mut machine = started();
        machine.check_in_next_stop(t0()).unwrap();
        let mut snapshot = machine.snapshot().unwrap();
        snapshot.driver_id = String::new();

        let mut fresh = TripMachine::new(Route::default());
        assert!(matches!(
            fresh.restore(&snapshot),
            Err(TripError::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn test_restore_rejects_inconsistent_snapshot() {
        let mut machine = started();
        machine.check_in_next_stop(t0()).unwrap();
        let mut snapshot = machine.snapshot().unwrap();
        snapshot.current_stop_index = 4;

        let mut fresh = TripMachine::new(Route::default());
        assert!(matches!(
            fresh.restore(&snapshot),
            Err(TripError::CorruptSnapshot { .. })
        ));
        assert_eq!(fresh.phase(), TripPhase::Idle);
    }
}
