//! Delivered trips, kept locally for the driver's history view.
//!
//! Entries arrive from acknowledged flushes (already `synced = true`) and are
//! dropped by age through [`TripHistory::purge`].

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::store::{keys, load_json_or_default, save_json, KeyValueStore};
use crate::trip::TripRecord;

pub const DEFAULT_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Default, Clone)]
pub struct TripHistory {
    trips: Vec<TripRecord>,
}

impl TripHistory {
    pub fn load(store: &impl KeyValueStore) -> Result<Self> {
        let trips = load_json_or_default(store, keys::TRIP_HISTORY)?;
        Ok(Self { trips })
    }

    pub fn trips(&self) -> &[TripRecord] {
        &self.trips
    }

    pub fn len(&self) -> usize {
        self.trips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }

    pub fn append(&mut self, store: &mut impl KeyValueStore, delivered: &[TripRecord]) -> Result<()> {
        if delivered.is_empty() {
            return Ok(());
        }
        let mut next = self.trips.clone();
        for trip in delivered {
            if !next.iter().any(|existing| existing.id == trip.id) {
                next.push(trip.clone());
            }
        }
        save_json(store, keys::TRIP_HISTORY, &next)?;
        self.trips = next;
        Ok(())
    }

    /// Removes trips that ended before `now - older_than`. Returns the count.
    pub fn purge(
        &mut self,
        store: &mut impl KeyValueStore,
        now: DateTime<Utc>,
        older_than: Duration,
    ) -> Result<usize> {
        let cutoff = now - older_than;
        let kept: Vec<TripRecord> = self
            .trips
            .iter()
            .filter(|trip| trip.end_time >= cutoff)
            .cloned()
            .collect();
        let removed = self.trips.len() - kept.len();
        if removed > 0 {
            save_json(store, keys::TRIP_HISTORY, &kept)?;
            self.trips = kept;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn trip(id: &str, ended: DateTime<Utc>) -> TripRecord {
        TripRecord {
            id: id.to_string(),
            route_id: "route5".to_string(),
            route_name: "Engineering Loop".to_string(),
            bus_number: "101".to_string(),
            driver_id: "D-1".to_string(),
            start_time: ended - Duration::minutes(40),
            end_time: ended,
            stops: Vec::new(),
            total_passengers: 0,
            synced: true,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn append_skips_duplicates() {
        let mut store = MemoryStore::new();
        let mut history = TripHistory::load(&store).unwrap();
        history
            .append(&mut store, &[trip("a", now()), trip("b", now())])
            .unwrap();
        history.append(&mut store, &[trip("a", now())]).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(TripHistory::load(&store).unwrap().len(), 2);
    }

    #[test]
    fn purge_drops_only_old_trips() {
        let mut store = MemoryStore::new();
        let mut history = TripHistory::load(&store).unwrap();
        history
            .append(
                &mut store,
                &[
                    trip("old", now() - Duration::days(9)),
                    trip("recent", now() - Duration::days(2)),
                ],
            )
            .unwrap();
        let removed = history
            .purge(&mut store, now(), Duration::days(DEFAULT_RETENTION_DAYS))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(history.trips()[0].id, "recent");
    }

    #[test]
    fn purge_with_nothing_old_does_not_write() {
        let mut store = MemoryStore::new();
        let mut history = TripHistory::load(&store).unwrap();
        store.set_unavailable(true);
        assert_eq!(
            history
                .purge(&mut store, now(), Duration::days(DEFAULT_RETENTION_DAYS))
                .unwrap(),
            0
        );
    }
}
