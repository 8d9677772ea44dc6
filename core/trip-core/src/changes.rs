//! Student-portal preference and report changes made while offline.
//!
//! Same durability and delivery rules as the trip queue, under separate
//! store keys.

use chrono::{DateTime, Utc};
use serde_json::Value;
use ulid::Ulid;

use crate::error::Result;
use crate::store::KeyValueStore;
use crate::sync::{FlushOutcome, SyncGate, SyncQueue, Transport, CHANGE_QUEUE};
use bustrack_sync_protocol::PendingChange;

pub struct ChangeLog {
    queue: SyncQueue<PendingChange>,
}

impl ChangeLog {
    pub fn load(store: &impl KeyValueStore) -> Result<Self> {
        Ok(Self {
            queue: SyncQueue::load(store, CHANGE_QUEUE)?,
        })
    }

    /// Queues a change and returns its id.
    pub fn record(
        &mut self,
        store: &mut impl KeyValueStore,
        kind: &str,
        data: Value,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let change = PendingChange {
            id: Ulid::new().to_string(),
            kind: kind.to_string(),
            data,
            timestamp: now,
        };
        let id = change.id.clone();
        self.queue.enqueue(store, change)?;
        tracing::debug!(kind, id = %id, "Change queued");
        Ok(id)
    }

    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.queue.last_sync()
    }

    pub fn flush(
        &mut self,
        store: &mut impl KeyValueStore,
        transport: &mut dyn Transport<PendingChange>,
        gate: SyncGate,
        now: DateTime<Utc>,
    ) -> Result<FlushOutcome<PendingChange>> {
        self.queue.flush(store, transport, gate, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TripError;
    use crate::store::MemoryStore;
    use crate::sync::{DeferReason, DeliveryError};
    use chrono::TimeZone;

    struct Recorder {
        sent: Vec<String>,
        fail: bool,
    }

    impl Transport<PendingChange> for Recorder {
        fn send(&mut self, batch: &[PendingChange]) -> std::result::Result<(), DeliveryError> {
            if self.fail {
                return Err(DeliveryError::Timeout);
            }
            self.sent.extend(batch.iter().map(|c| c.kind.clone()));
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap()
    }

    #[test]
    fn changes_survive_reload() {
        let mut store = MemoryStore::new();
        let mut log = ChangeLog::load(&store).unwrap();
        log.record(&mut store, "favorite", serde_json::json!({"stop": 3}), now())
            .unwrap();
        log.record(&mut store, "notifications", serde_json::json!(false), now())
            .unwrap();
        assert_eq!(ChangeLog::load(&store).unwrap().pending_count(), 2);
    }

    #[test]
    fn flush_delivers_in_order_and_stamps() {
        let mut store = MemoryStore::new();
        let mut log = ChangeLog::load(&store).unwrap();
        log.record(&mut store, "favorite", Value::Null, now()).unwrap();
        log.record(&mut store, "report", Value::Null, now()).unwrap();

        let mut transport = Recorder {
            sent: Vec::new(),
            fail: false,
        };
        log.flush(&mut store, &mut transport, SyncGate::Open, now())
            .unwrap();
        assert_eq!(transport.sent, vec!["favorite", "report"]);
        assert_eq!(log.pending_count(), 0);
        assert_eq!(log.last_sync(), Some(now()));
    }

    #[test]
    fn failed_or_deferred_flush_keeps_changes() {
        let mut store = MemoryStore::new();
        let mut log = ChangeLog::load(&store).unwrap();
        log.record(&mut store, "favorite", Value::Null, now()).unwrap();

        let mut transport = Recorder {
            sent: Vec::new(),
            fail: true,
        };
        let err = log
            .flush(&mut store, &mut transport, SyncGate::Open, now())
            .unwrap_err();
        assert!(matches!(err, TripError::SyncFailure { .. }));

        let outcome = log
            .flush(
                &mut store,
                &mut transport,
                SyncGate::Deferred(DeferReason::Offline),
                now(),
            )
            .unwrap();
        assert!(matches!(outcome, FlushOutcome::Deferred(DeferReason::Offline)));
        assert_eq!(log.pending_count(), 1);
    }
}
