//! Error types for booking operations.

use thiserror::Error;

use crate::model::{BookingId, BookingStatus, EventId};
use crate::payment::ProviderError;

/// Top-level error covering every engine operation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("reservation failed: {0}")]
    Reserve(#[from] ReserveError),

    #[error("payment verification failed: {0}")]
    Verify(#[from] VerifyError),

    #[error("cancellation failed: {0}")]
    Cancel(#[from] CancelError),

    #[error("{0}")]
    Catalog(#[from] CatalogError),
}

/// Error during reservation.
#[derive(Debug, Error)]
pub enum ReserveError {
    #[error("ticket count must be at least 1")]
    InvalidRequest,

    #[error("event {0} not found")]
    EventNotFound(EventId),

    #[error("insufficient inventory for event {event}: requested {requested}, available {available}")]
    InsufficientInventory {
        event: EventId,
        requested: u32,
        available: u32,
    },

    /// The hold was already rolled back when this is returned; retrying
    /// creates a fresh booking.
    #[error("payment order could not be opened: {0}")]
    Provider(#[from] ProviderError),
}

/// Error during payment callback verification.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// No pending booking matches the order reference: it never existed, or
    /// was already swept/cancelled.
    #[error("no pending booking for order '{0}'")]
    UnknownOrder(String),

    /// Signature mismatch; the booking was failed and its hold released.
    #[error("payment signature mismatch for order '{0}'")]
    SignatureInvalid(String),
}

/// Error during cancellation.
#[derive(Debug, Error)]
pub enum CancelError {
    #[error("booking {0} not found")]
    BookingNotFound(BookingId),

    #[error("booking {id} is {status} and cannot be cancelled")]
    InvalidTransition {
        id: BookingId,
        status: BookingStatus,
    },
}

/// Error from catalog administration.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("event {0} not found")]
    EventNotFound(EventId),

    #[error("invalid event: {0}")]
    InvalidEvent(&'static str),

    #[error("total capacity {requested} is below the {held} tickets currently held")]
    CapacityBelowHeld { requested: u32, held: u32 },

    #[error("event {event} still has {count} active bookings")]
    ActiveBookings { event: EventId, count: usize },
}
