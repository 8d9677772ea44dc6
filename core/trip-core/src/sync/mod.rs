//! Offline-first delivery of finalized records.
//!
//! - [`queue`]: durable, single-flight outbox ([`SyncQueue`])
//! - [`transport`]: the [`Transport`] seam and [`DeliveryError`]
//! - [`policy`]: connectivity gate, status indicator, last-sync label
//! - [`backoff`]: spacing of automatic retries

pub mod backoff;
pub mod policy;
pub mod queue;
mod transport;

pub use backoff::RetryState;
pub use policy::{last_sync_label, sync_gate, DeferReason, NetworkStatus, SyncGate, SyncStatus};
pub use queue::{
    FlushBatch, FlushOutcome, FlushReport, FlushStart, QueueItem, QueueKeys, SyncQueue,
    CHANGE_QUEUE, TRIP_QUEUE,
};
pub use transport::{DeliveryError, Transport};
