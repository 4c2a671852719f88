//! Booking and ticket-inventory reservation engine.
//!
//! The engine is the single point of truth for capacity math: it reserves
//! tickets against catalog events, drives each booking through its payment
//! lifecycle, and releases holds on failure or cancellation. Methods take
//! `&self` and are safe to call from many request handlers at once; share
//! the engine behind an `Arc`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::Amount;
use crate::config::{DeletionPolicy, EngineConfig};
use crate::model::{
    Booking, BookingId, BookingStatus, Event, EventId, EventUpdate, NewEvent, Purchaser,
};
use crate::payment::{self, PaymentProvider};

mod store;
use store::{MemoryStore, TransitionError};

mod error;
pub use error::{CancelError, CatalogError, EngineError, ReserveError, VerifyError};

/// Payment reference recorded on bookings that never went to the provider.
pub const FREE_EVENT_PAYMENT_REF: &str = "FREE_EVENT_PAYMENT";

/// What the caller needs to hand to the client so it can complete payment.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub order_ref: String,
    /// Public provider key for the client-side checkout dialog.
    pub key_id: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// Outcome of a successful reservation. `checkout` is `None` for free
/// events, which confirm immediately.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub booking: Booking,
    pub checkout: Option<Checkout>,
}

/// The booking engine.
///
/// Owns the catalog/ledger store and the payment provider handle.
pub struct Engine {
    store: MemoryStore,
    provider: Arc<dyn PaymentProvider>,
    config: EngineConfig,
}

/// Public API
impl Engine {
    pub fn new(provider: Arc<dyn PaymentProvider>, config: EngineConfig) -> Self {
        Self {
            store: MemoryStore::new(),
            provider,
            config,
        }
    }

    // Catalog

    pub fn create_event(&self, new: NewEvent) -> Result<Event, CatalogError> {
        if new.total_tickets == 0 {
            return Err(CatalogError::InvalidEvent("total capacity must be at least 1"));
        }
        if new.price < Amount::default() {
            return Err(CatalogError::InvalidEvent("price must not be negative"));
        }

        let event = self.store.insert_event(new);
        info!(
            event = event.id,
            total = event.total_tickets,
            price = %event.price,
            "event created"
        );
        Ok(event)
    }

    pub fn update_event(&self, id: EventId, update: EventUpdate) -> Result<Event, CatalogError> {
        let event = self.store.update_event(id, update)?;
        info!(
            event = id,
            total = event.total_tickets,
            available = event.available_tickets,
            price = %event.price,
            "event updated"
        );
        Ok(event)
    }

    pub fn event(&self, id: EventId) -> Option<Event> {
        self.store.event(id)
    }

    pub fn events(&self) -> Vec<Event> {
        self.store.events()
    }

    /// Delete an event. With `DeletionPolicy::Refuse` this fails while any
    /// non-terminal booking references the event; with `CascadeCancel` those
    /// bookings are cancelled (capacity released) before the event goes.
    pub fn delete_event(&self, id: EventId) -> Result<(), CatalogError> {
        // Tombstone first so no new reservation can slip in behind the scan.
        self.store.begin_delete(id)?;

        let active = self.store.active_for_event(id);
        if !active.is_empty() && self.config.deletion_policy == DeletionPolicy::Refuse {
            self.store.abort_delete(id);
            let err = CatalogError::ActiveBookings {
                event: id,
                count: active.len(),
            };
            info!(event = id, reason = %err, "event deletion refused");
            return Err(err);
        }

        for booking_id in active {
            // A lost race means someone else already resolved the booking.
            let _ = self.store.transition_released(
                booking_id,
                &[BookingStatus::PendingPayment, BookingStatus::Confirmed],
                BookingStatus::Cancelled,
            );
        }
        self.store.finish_delete(id);
        info!(event = id, "event deleted");
        Ok(())
    }

    // Reservation

    /// Reserve `tickets` against an event: the atomic check-and-decrement,
    /// the ledger entry, and (for paid events) the provider order.
    ///
    /// The decrement and the ledger insert are one critical section under
    /// the event lock: a concurrent deletion can never observe the hold
    /// without its booking, and a concurrent admin price edit cannot change
    /// what this purchaser owes (the price is snapshotted inside the
    /// section). If the provider order cannot be opened the hold is rolled
    /// back before the error returns.
    pub async fn reserve(
        &self,
        event_id: EventId,
        tickets: u32,
        purchaser: Purchaser,
    ) -> Result<Reservation, ReserveError> {
        if tickets == 0 {
            let err = ReserveError::InvalidRequest;
            info!(event = event_id, tickets, reason = %err, "reservation rejected");
            return Err(err);
        }

        let booked = self
            .store
            .reserve_booking(event_id, tickets, purchaser, |event| {
                if event.price.is_zero() {
                    // Free events skip the provider round-trip entirely.
                    (
                        BookingStatus::Confirmed,
                        Some(FREE_EVENT_PAYMENT_REF.to_string()),
                    )
                } else {
                    (BookingStatus::PendingPayment, None)
                }
            });
        let booking = match booked {
            Ok(booking) => booking,
            Err(e) => {
                info!(event = event_id, tickets, reason = %e, "reservation rejected");
                return Err(e);
            }
        };

        if booking.status == BookingStatus::Confirmed {
            info!(
                event = event_id,
                booking = booking.id,
                tickets,
                "free booking confirmed"
            );
            return Ok(Reservation {
                booking,
                checkout: None,
            });
        }

        let amount_minor = booking.total_price().to_minor_units();
        let receipt = format!("receipt_{}", booking.id);

        // The hold is already committed; no lock is held across this call.
        match self
            .provider
            .open_order(amount_minor, &self.config.currency, &receipt)
            .await
        {
            Ok(order) => {
                let booking = self
                    .store
                    .set_order_ref(booking.id, &order.order_ref)
                    .unwrap_or(booking);
                info!(
                    event = event_id,
                    booking = booking.id,
                    order = %order.order_ref,
                    amount_minor,
                    "reservation pending payment"
                );
                Ok(Reservation {
                    booking,
                    checkout: Some(Checkout {
                        order_ref: order.order_ref,
                        key_id: self.config.provider_key_id.clone(),
                        amount_minor,
                        currency: order.currency,
                    }),
                })
            }
            Err(e) => {
                // Roll the hold back; a retry creates a fresh booking.
                let _ = self.store.transition_released(
                    booking.id,
                    &[BookingStatus::PendingPayment],
                    BookingStatus::Failed,
                );
                warn!(
                    event = event_id,
                    booking = booking.id,
                    reason = %e,
                    "provider order failed, hold released"
                );
                Err(ReserveError::Provider(e))
            }
        }
    }

    // Payment confirmation

    /// Resolve a provider callback for `order_ref`.
    ///
    /// Idempotent under provider retries: re-verifying a confirmed booking
    /// is a no-op success. A booking already swept or cancelled reports
    /// `UnknownOrder` rather than resurrecting. A signature mismatch fails
    /// the booking and releases its hold.
    pub fn verify_payment(
        &self,
        order_ref: &str,
        payment_ref: &str,
        signature: &str,
    ) -> Result<Booking, VerifyError> {
        let Some(booking) = self.store.booking_by_order_ref(order_ref) else {
            let err = VerifyError::UnknownOrder(order_ref.to_string());
            info!(order = order_ref, reason = %err, "verification rejected");
            return Err(err);
        };

        match booking.status {
            BookingStatus::Confirmed => {
                info!(
                    order = order_ref,
                    booking = booking.id,
                    "verification replayed, already confirmed"
                );
                return Ok(booking);
            }
            BookingStatus::Cancelled | BookingStatus::Failed => {
                let err = VerifyError::UnknownOrder(order_ref.to_string());
                info!(
                    order = order_ref,
                    booking = booking.id,
                    status = %booking.status,
                    reason = %err,
                    "verification rejected"
                );
                return Err(err);
            }
            BookingStatus::PendingPayment => {}
        }

        if !payment::verify_signature(
            &self.config.provider_key_secret,
            order_ref,
            payment_ref,
            signature,
        ) {
            let _ = self.store.transition_released(
                booking.id,
                &[BookingStatus::PendingPayment],
                BookingStatus::Failed,
            );
            let err = VerifyError::SignatureInvalid(order_ref.to_string());
            warn!(
                order = order_ref,
                booking = booking.id,
                reason = %err,
                "verification rejected, hold released"
            );
            return Err(err);
        }

        match self.store.transition(
            booking.id,
            &[BookingStatus::PendingPayment],
            BookingStatus::Confirmed,
            Some(payment_ref),
        ) {
            Ok(confirmed) => {
                info!(
                    order = order_ref,
                    booking = confirmed.id,
                    payment = payment_ref,
                    "booking confirmed"
                );
                Ok(confirmed)
            }
            // Lost the CAS to a concurrent retry of the same callback.
            Err(TransitionError::Rejected(BookingStatus::Confirmed)) => {
                Ok(self.store.booking(booking.id).unwrap_or(booking))
            }
            // Lost the CAS to the sweep or a cancellation; the booking is gone.
            Err(_) => {
                let err = VerifyError::UnknownOrder(order_ref.to_string());
                info!(
                    order = order_ref,
                    booking = booking.id,
                    reason = %err,
                    "verification lost to a concurrent transition"
                );
                Err(err)
            }
        }
    }

    // Cancellation

    /// Cancel a PENDING_PAYMENT or CONFIRMED booking, returning its tickets
    /// to the event. Cancelling an already-cancelled booking is a no-op
    /// success; cancelling a FAILED booking is rejected (its hold was
    /// already released). Authorization is the caller's concern.
    pub fn cancel(&self, id: BookingId) -> Result<Booking, CancelError> {
        match self.store.transition_released(
            id,
            &[BookingStatus::PendingPayment, BookingStatus::Confirmed],
            BookingStatus::Cancelled,
        ) {
            Ok(booking) => {
                info!(
                    booking = id,
                    event = booking.event_id,
                    tickets = booking.tickets,
                    "booking cancelled"
                );
                Ok(booking)
            }
            Err(TransitionError::NotFound) => {
                let err = CancelError::BookingNotFound(id);
                info!(booking = id, reason = %err, "cancellation rejected");
                Err(err)
            }
            Err(TransitionError::Rejected(BookingStatus::Cancelled)) => {
                info!(booking = id, "cancellation replayed, already cancelled");
                self.store
                    .booking(id)
                    .ok_or(CancelError::BookingNotFound(id))
            }
            Err(TransitionError::Rejected(status)) => {
                let err = CancelError::InvalidTransition { id, status };
                info!(booking = id, reason = %err, "cancellation rejected");
                Err(err)
            }
        }
    }

    // Timeout sweep

    /// Fail every PENDING_PAYMENT booking older than the configured payment
    /// timeout, releasing its hold. Returns how many were swept. Uses the
    /// same status compare-and-set as verification, so a legitimate callback
    /// racing the sweep resolves to exactly one winner.
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.config.payment_timeout();
        let mut swept = 0;
        for id in self.store.stale_pending(cutoff) {
            if let Ok(booking) = self.store.transition_released(
                id,
                &[BookingStatus::PendingPayment],
                BookingStatus::Failed,
            ) {
                swept += 1;
                info!(
                    booking = id,
                    event = booking.event_id,
                    tickets = booking.tickets,
                    "stale booking failed, hold released"
                );
            }
            // A lost CAS means a verification or cancellation won the race.
        }
        swept
    }

    /// Periodic sweep loop; runs until the owning task is dropped.
    pub async fn run_sweeper(&self) {
        let mut interval = tokio::time::interval(self.config.sweep_interval());
        loop {
            interval.tick().await;
            self.sweep_stale(Utc::now());
        }
    }

    // Ledger queries

    pub fn booking(&self, id: BookingId) -> Option<Booking> {
        self.store.booking(id)
    }

    pub fn bookings_by_email(&self, email: &str) -> Vec<Booking> {
        self.store.bookings_by_email(email)
    }

    /// Admin listing: every booking still holding capacity (CANCELLED and
    /// FAILED are excluded).
    pub fn active_bookings(&self) -> Vec<Booking> {
        self.store.active_bookings()
    }
}
