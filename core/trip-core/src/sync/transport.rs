//! Delivery seam between the sync queue and whatever carries records upstream.
//!
//! The queue only needs a yes/no answer per batch. Production code plugs in a
//! socket client; tests plug in deterministic fakes.

/// Why a batch was not acknowledged. Always transient from the queue's point
/// of view: the batch stays queued and is retried later.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("receiver unreachable: {0}")]
    Unreachable(String),

    #[error("receiver rejected batch: {code}: {message}")]
    Rejected { code: String, message: String },

    #[error("timed out waiting for acknowledgement")]
    Timeout,

    #[error("malformed acknowledgement: {0}")]
    BadResponse(String),
}

/// Sends one batch and reports whether the receiver acknowledged all of it.
pub trait Transport<T> {
    fn send(&mut self, batch: &[T]) -> Result<(), DeliveryError>;
}
