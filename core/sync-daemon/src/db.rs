//! SQLite persistence for the sync receiver.
//!
//! Two append-only tables keyed by record id. Inserts use
//! `ON CONFLICT(id) DO NOTHING`, so a client that redelivers a batch after a
//! lost acknowledgement gets the same answer without creating duplicates.
//! Each batch is written in one transaction: either every record in it is
//! stored or none is.

use bustrack_sync_protocol::{PendingChange, SubmitAck, TripRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::path::PathBuf;

pub struct Db {
    path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct Totals {
    pub trips: i64,
    pub changes: i64,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    pub fn insert_trips(
        &self,
        trips: &[TripRecord],
        received_at: DateTime<Utc>,
    ) -> Result<SubmitAck, String> {
        let received_at = received_at.to_rfc3339();
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to begin trip batch: {}", err))?;
            let mut ack = SubmitAck::default();
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO trips \
                            (id, route_id, driver_id, bus_number, start_time, end_time, \
                             stop_count, total_passengers, received_at, payload) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                         ON CONFLICT(id) DO NOTHING",
                    )
                    .map_err(|err| format!("Failed to prepare trip insert: {}", err))?;

                for trip in trips {
                    let mut stored = trip.clone();
                    stored.synced = true;
                    let payload = serde_json::to_string(&stored)
                        .map_err(|err| format!("Failed to serialize trip payload: {}", err))?;
                    let inserted = stmt
                        .execute(params![
                            trip.id,
                            trip.route_id,
                            trip.driver_id,
                            trip.bus_number,
                            trip.start_time.to_rfc3339(),
                            trip.end_time.to_rfc3339(),
                            trip.stops.len() as i64,
                            trip.total_passengers,
                            received_at,
                            payload
                        ])
                        .map_err(|err| format!("Failed to insert trip {}: {}", trip.id, err))?;
                    if inserted == 0 {
                        ack.duplicates += 1;
                    } else {
                        ack.accepted += 1;
                    }
                }
            }
            tx.commit()
                .map_err(|err| format!("Failed to commit trip batch: {}", err))?;
            Ok(ack)
        })
    }

    pub fn insert_changes(
        &self,
        changes: &[PendingChange],
        received_at: DateTime<Utc>,
    ) -> Result<SubmitAck, String> {
        let received_at = received_at.to_rfc3339();
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to begin change batch: {}", err))?;
            let mut ack = SubmitAck::default();
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO changes (id, kind, recorded_at, received_at, payload) \
                         VALUES (?1, ?2, ?3, ?4, ?5) \
                         ON CONFLICT(id) DO NOTHING",
                    )
                    .map_err(|err| format!("Failed to prepare change insert: {}", err))?;

                for change in changes {
                    let payload = serde_json::to_string(&change.data)
                        .map_err(|err| format!("Failed to serialize change data: {}", err))?;
                    let inserted = stmt
                        .execute(params![
                            change.id,
                            change.kind,
                            change.timestamp.to_rfc3339(),
                            received_at,
                            payload
                        ])
                        .map_err(|err| format!("Failed to insert change {}: {}", change.id, err))?;
                    if inserted == 0 {
                        ack.duplicates += 1;
                    } else {
                        ack.accepted += 1;
                    }
                }
            }
            tx.commit()
                .map_err(|err| format!("Failed to commit change batch: {}", err))?;
            Ok(ack)
        })
    }

    #[cfg(test)]
    pub fn get_trip(&self, id: &str) -> Result<Option<TripRecord>, String> {
        use rusqlite::OptionalExtension;

        let payload: Option<String> = self.with_connection(|conn| {
            conn.query_row(
                "SELECT payload FROM trips WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| format!("Failed to query trip: {}", err))
        })?;

        payload
            .map(|payload| {
                serde_json::from_str(&payload)
                    .map_err(|err| format!("Failed to parse trip payload: {}", err))
            })
            .transpose()
    }

    pub fn totals(&self) -> Result<Totals, String> {
        self.with_connection(|conn| {
            let trips = conn
                .query_row("SELECT COUNT(*) FROM trips", [], |row| row.get::<_, i64>(0))
                .map_err(|err| format!("Failed to count trips: {}", err))?;
            let changes = conn
                .query_row("SELECT COUNT(*) FROM changes", [], |row| {
                    row.get::<_, i64>(0)
                })
                .map_err(|err| format!("Failed to count changes: {}", err))?;
            Ok(Totals { trips, changes })
        })
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS trips (
                    id TEXT PRIMARY KEY,
                    route_id TEXT NOT NULL,
                    driver_id TEXT NOT NULL,
                    bus_number TEXT NOT NULL,
                    start_time TEXT NOT NULL,
                    end_time TEXT NOT NULL,
                    stop_count INTEGER NOT NULL,
                    total_passengers INTEGER NOT NULL,
                    received_at TEXT NOT NULL,
                    payload TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_trips_driver ON trips(driver_id, end_time);
                 CREATE TABLE IF NOT EXISTS changes (
                    id TEXT PRIMARY KEY,
                    kind TEXT NOT NULL,
                    recorded_at TEXT NOT NULL,
                    received_at TEXT NOT NULL,
                    payload TEXT NOT NULL
                 );
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create receiver data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;

        Ok(conn)
    }
}
