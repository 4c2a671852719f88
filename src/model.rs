//! Core domain types for the booking engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Amount;

/// Event identifier.
pub type EventId = u64;

/// Booking (ledger entry) identifier.
pub type BookingId = u64;

/// The person a booking is made for. The engine stores it verbatim; it does
/// not authenticate anyone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchaser {
    pub name: String,
    pub email: String,
}

impl Purchaser {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// Lifecycle of a booking.
///
/// Created as `PendingPayment` (capacity already held), or `Confirmed`
/// directly for free events. Terminal states never revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    /// Capacity is held, waiting for the payment round-trip to resolve.
    PendingPayment,
    /// Payment verified (or free event); the hold became a sale.
    Confirmed,
    /// Reversed by the purchaser or an admin; capacity returned to the pool.
    Cancelled,
    /// Payment never completed (bad signature or timeout); capacity returned.
    Failed,
}

impl BookingStatus {
    /// Active bookings hold capacity against their event.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::PendingPayment | Self::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PendingPayment => "PENDING_PAYMENT",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A catalog event with its capacity counters.
///
/// `available_tickets` is mutated only through the store's reserve/release
/// primitives; `available_tickets <= total_tickets` always holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub description: String,
    pub location: String,
    pub starts_at: DateTime<Utc>,
    pub price: Amount,
    pub total_tickets: u32,
    pub available_tickets: u32,
}

/// Input for creating a catalog event. `available_tickets` starts at
/// `total_tickets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub title: String,
    pub description: String,
    pub location: String,
    pub starts_at: DateTime<Utc>,
    pub price: Amount,
    pub total_tickets: u32,
}

/// Partial update for a catalog event. A price edit never touches the price
/// snapshots of existing bookings; a capacity edit moves `total` and
/// `available` together, keeping current holds intact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub price: Option<Amount>,
    pub total_tickets: Option<u32>,
}

/// A ledger entry: one row per purchase attempt.
///
/// `unit_price` is the price snapshot taken at reservation time, so an admin
/// price edit mid-payment cannot change what the purchaser owes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub event_id: EventId,
    pub purchaser: Purchaser,
    pub tickets: u32,
    pub unit_price: Amount,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    /// Provider order reference, set once the provider order is opened.
    pub order_ref: Option<String>,
    /// Provider payment reference, set on verified confirmation.
    pub payment_ref: Option<String>,
}

impl Booking {
    /// Order total at the snapshotted unit price.
    pub fn total_price(&self) -> Amount {
        self.unit_price * self.tickets
    }
}
