//! Durable outbox of finalized records awaiting delivery.
//!
//! # Contract
//!
//! - `enqueue` persists before it returns; a record is never only in memory.
//! - A flush sends every pending record as one batch. On acknowledgement the
//!   delivered records are removed and `last_sync` advances; on failure the
//!   queue is left exactly as it was.
//! - Flushes are single-flight. [`SyncQueue::begin_flush`] marks the queue
//!   busy until [`SyncQueue::complete_flush`]; a second request in between is
//!   answered with [`FlushStart::InFlight`] and remembered as a follow-up.
//! - Records enqueued while a flush is outstanding are not part of that
//!   batch and survive its completion.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::policy::{DeferReason, SyncGate};
use super::transport::{DeliveryError, Transport};
use crate::error::{Result, TripError};
use crate::store::{keys, load_json, save_json, KeyValueStore};
use crate::trip::TripRecord;
use bustrack_sync_protocol::PendingChange;

/// A record the queue can hold.
pub trait QueueItem: Clone + Serialize + DeserializeOwned {
    fn queue_id(&self) -> &str;

    /// Called on delivered copies before they are handed back to the caller.
    fn mark_synced(&mut self) {}
}

impl QueueItem for TripRecord {
    fn queue_id(&self) -> &str {
        &self.id
    }

    fn mark_synced(&mut self) {
        self.synced = true;
    }
}

impl QueueItem for PendingChange {
    fn queue_id(&self) -> &str {
        &self.id
    }
}

/// Store keys backing one queue.
#[derive(Debug, Clone, Copy)]
pub struct QueueKeys {
    pub pending: &'static str,
    pub last_sync: &'static str,
}

pub const TRIP_QUEUE: QueueKeys = QueueKeys {
    pending: keys::PENDING_SYNC,
    last_sync: keys::LAST_SYNC,
};

pub const CHANGE_QUEUE: QueueKeys = QueueKeys {
    pending: keys::PENDING_CHANGES,
    last_sync: keys::CHANGES_LAST_SYNC,
};

/// Snapshot of pending records handed out by `begin_flush`.
#[derive(Debug)]
pub struct FlushBatch<T> {
    items: Vec<T>,
}

impl<T> FlushBatch<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }
}

#[derive(Debug)]
pub enum FlushStart<T> {
    /// Nothing to send.
    Empty,
    /// Another flush is outstanding; a follow-up has been recorded.
    InFlight,
    Ready(FlushBatch<T>),
}

/// Result of a completed, acknowledged flush.
#[derive(Debug, Clone)]
pub struct FlushReport<T> {
    /// Delivered records, already marked synced.
    pub delivered: Vec<T>,
    pub synced_at: DateTime<Utc>,
    /// A flush was requested while this one was outstanding and records are
    /// still pending.
    pub follow_up: bool,
}

#[derive(Debug, Clone)]
pub enum FlushOutcome<T> {
    /// The gate was closed; nothing was attempted.
    Deferred(DeferReason),
    Empty,
    InFlight,
    Delivered(FlushReport<T>),
}

#[derive(Debug)]
pub struct SyncQueue<T> {
    keys: QueueKeys,
    pending: Vec<T>,
    last_sync: Option<DateTime<Utc>>,
    in_flight: Option<HashSet<String>>,
    follow_up_requested: bool,
}

impl<T: QueueItem> SyncQueue<T> {
    /// Loads the queue. A malformed queue is an error, not an empty queue:
    /// dropping it would silently lose trips.
    pub fn load(store: &impl KeyValueStore, keys: QueueKeys) -> Result<Self> {
        let pending: Vec<T> = load_json(store, keys.pending)?.unwrap_or_default();
        let last_sync = match load_json::<DateTime<Utc>>(store, keys.last_sync) {
            Ok(value) => value,
            Err(TripError::Json { source, .. }) => {
                tracing::warn!(key = keys.last_sync, error = %source, "Ignoring malformed last-sync time");
                None
            }
            Err(err) => return Err(err),
        };
        tracing::debug!(key = keys.pending, pending = pending.len(), "Sync queue loaded");
        Ok(Self {
            keys,
            pending,
            last_sync,
            in_flight: None,
            follow_up_requested: false,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> &[T] {
        &self.pending
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn enqueue(&mut self, store: &mut impl KeyValueStore, item: T) -> Result<()> {
        let mut next = self.pending.clone();
        next.push(item);
        save_json(store, self.keys.pending, &next)?;
        self.pending = next;
        Ok(())
    }

    pub fn begin_flush(&mut self) -> FlushStart<T> {
        if self.in_flight.is_some() {
            self.follow_up_requested = true;
            return FlushStart::InFlight;
        }
        if self.pending.is_empty() {
            return FlushStart::Empty;
        }
        let ids = self
            .pending
            .iter()
            .map(|item| item.queue_id().to_string())
            .collect();
        self.in_flight = Some(ids);
        FlushStart::Ready(FlushBatch {
            items: self.pending.clone(),
        })
    }

    /// Applies the transport's verdict for `batch`.
    ///
    /// On failure nothing but the in-flight marker changes. On success the
    /// batch's records leave the queue. If persisting the shorter queue fails,
    /// memory keeps the records and they are redelivered. Once it is saved the
    /// delivery stands; a failed `last_sync` write is only logged.
    pub fn complete_flush(
        &mut self,
        store: &mut impl KeyValueStore,
        batch: FlushBatch<T>,
        delivery: std::result::Result<(), DeliveryError>,
        now: DateTime<Utc>,
    ) -> Result<FlushReport<T>> {
        let ids = self.in_flight.take().unwrap_or_default();
        let follow_up_requested = std::mem::take(&mut self.follow_up_requested);

        if let Err(err) = delivery {
            tracing::warn!(key = self.keys.pending, error = %err, pending = self.pending.len(), "Flush failed, queue kept");
            return Err(TripError::from(err));
        }

        let remaining: Vec<T> = self
            .pending
            .iter()
            .filter(|item| !ids.contains(item.queue_id()))
            .cloned()
            .collect();
        save_json(store, self.keys.pending, &remaining)?;
        self.pending = remaining;
        self.last_sync = Some(now);
        if let Err(err) = save_json(store, self.keys.last_sync, &now) {
            tracing::warn!(key = self.keys.last_sync, error = %err, "Delivered, but last sync time not saved");
        }

        let delivered: Vec<T> = batch
            .items
            .into_iter()
            .map(|mut item| {
                item.mark_synced();
                item
            })
            .collect();
        tracing::info!(
            key = self.keys.pending,
            delivered = delivered.len(),
            remaining = self.pending.len(),
            "Flush acknowledged"
        );

        Ok(FlushReport {
            delivered,
            synced_at: now,
            follow_up: follow_up_requested && !self.pending.is_empty(),
        })
    }

    /// Checks the gate, then begins, sends, and completes in one call.
    pub fn flush(
        &mut self,
        store: &mut impl KeyValueStore,
        transport: &mut dyn Transport<T>,
        gate: SyncGate,
        now: DateTime<Utc>,
    ) -> Result<FlushOutcome<T>> {
        if let SyncGate::Deferred(reason) = gate {
            tracing::debug!(key = self.keys.pending, %reason, "Flush deferred");
            return Ok(FlushOutcome::Deferred(reason));
        }
        match self.begin_flush() {
            FlushStart::Empty => Ok(FlushOutcome::Empty),
            FlushStart::InFlight => Ok(FlushOutcome::InFlight),
            FlushStart::Ready(batch) => {
                let delivery = transport.send(batch.items());
                self.complete_flush(store, batch, delivery, now)
                    .map(FlushOutcome::Delivered)
            }
        }
    }
}
