//! In-memory catalog and ledger store.
//!
//! The persistence collaborator behind the engine. Each table is a
//! `RwLock<HashMap<id, Arc<Mutex<record>>>>`: the map lock is only held to
//! locate a record, and every conditional update runs under that record's
//! own mutex, so contention stays scoped per event / per booking. Where a
//! booking record and its event must change together the lock order is
//! always booking first, then event; the reservation path holds only the
//! event lock while it appends the new booking row.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::Amount;
use crate::model::{
    Booking, BookingId, BookingStatus, Event, EventId, EventUpdate, NewEvent, Purchaser,
};

use super::error::{CatalogError, ReserveError};

/// Why a status compare-and-set did not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransitionError {
    NotFound,
    /// The booking was in this status instead of one of the expected ones.
    Rejected(BookingStatus),
}

struct EventRecord {
    event: Event,
    /// Set while a deletion is in flight; blocks new reservations without
    /// breaking capacity releases from in-flight cancellations.
    deleting: bool,
}

pub(crate) struct MemoryStore {
    events: RwLock<HashMap<EventId, Arc<Mutex<EventRecord>>>>,
    bookings: RwLock<HashMap<BookingId, Arc<Mutex<Booking>>>>,
    /// Provider order reference -> booking, for callback lookups.
    orders: RwLock<HashMap<String, BookingId>>,
    next_event_id: AtomicU64,
    next_booking_id: AtomicU64,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            bookings: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            next_event_id: AtomicU64::new(1),
            next_booking_id: AtomicU64::new(1),
        }
    }

    fn event_arc(&self, id: EventId) -> Option<Arc<Mutex<EventRecord>>> {
        self.events.read().expect("lock poisoned").get(&id).cloned()
    }

    fn booking_arc(&self, id: BookingId) -> Option<Arc<Mutex<Booking>>> {
        self.bookings
            .read()
            .expect("lock poisoned")
            .get(&id)
            .cloned()
    }

    // Catalog

    pub(crate) fn insert_event(&self, new: NewEvent) -> Event {
        let id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        let event = Event {
            id,
            title: new.title,
            description: new.description,
            location: new.location,
            starts_at: new.starts_at,
            price: new.price,
            total_tickets: new.total_tickets,
            available_tickets: new.total_tickets,
        };
        self.events.write().expect("lock poisoned").insert(
            id,
            Arc::new(Mutex::new(EventRecord {
                event: event.clone(),
                deleting: false,
            })),
        );
        event
    }

    pub(crate) fn event(&self, id: EventId) -> Option<Event> {
        self.event_arc(id)
            .map(|rec| rec.lock().expect("lock poisoned").event.clone())
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        let arcs: Vec<_> = self
            .events
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect();
        let mut events: Vec<Event> = arcs
            .iter()
            .map(|rec| rec.lock().expect("lock poisoned").event.clone())
            .collect();
        events.sort_by_key(|e| e.id);
        events
    }

    pub(crate) fn update_event(
        &self,
        id: EventId,
        update: EventUpdate,
    ) -> Result<Event, CatalogError> {
        let rec = self.event_arc(id).ok_or(CatalogError::EventNotFound(id))?;
        let mut rec = rec.lock().expect("lock poisoned");

        if let Some(price) = update.price {
            if price < Amount::default() {
                return Err(CatalogError::InvalidEvent("price must not be negative"));
            }
        }
        if let Some(total) = update.total_tickets {
            let held = rec.event.total_tickets - rec.event.available_tickets;
            if total < held {
                return Err(CatalogError::CapacityBelowHeld {
                    requested: total,
                    held,
                });
            }
            rec.event.total_tickets = total;
            rec.event.available_tickets = total - held;
        }

        if let Some(title) = update.title {
            rec.event.title = title;
        }
        if let Some(description) = update.description {
            rec.event.description = description;
        }
        if let Some(location) = update.location {
            rec.event.location = location;
        }
        if let Some(starts_at) = update.starts_at {
            rec.event.starts_at = starts_at;
        }
        if let Some(price) = update.price {
            rec.event.price = price;
        }

        Ok(rec.event.clone())
    }

    /// Mark an event as being deleted; reservations against it fail from
    /// this point on. Idempotent.
    pub(crate) fn begin_delete(&self, id: EventId) -> Result<(), CatalogError> {
        let rec = self.event_arc(id).ok_or(CatalogError::EventNotFound(id))?;
        rec.lock().expect("lock poisoned").deleting = true;
        Ok(())
    }

    pub(crate) fn abort_delete(&self, id: EventId) {
        if let Some(rec) = self.event_arc(id) {
            rec.lock().expect("lock poisoned").deleting = false;
        }
    }

    pub(crate) fn finish_delete(&self, id: EventId) {
        self.events.write().expect("lock poisoned").remove(&id);
    }

    // Capacity

    /// Decrement-if-sufficient plus the ledger insert, one critical section
    /// under the event lock: the single serialization point for concurrent
    /// reservations against one event. `book` maps the event snapshot (the
    /// price snapshot source, hold already taken) to the booking's initial
    /// status and payment reference.
    ///
    /// The hold and its booking row commit together, so a deletion scan that
    /// starts after this returns always sees the booking.
    pub(crate) fn reserve_booking(
        &self,
        id: EventId,
        tickets: u32,
        purchaser: Purchaser,
        book: impl FnOnce(&Event) -> (BookingStatus, Option<String>),
    ) -> Result<Booking, ReserveError> {
        let rec = self.event_arc(id).ok_or(ReserveError::EventNotFound(id))?;
        let mut rec = rec.lock().expect("lock poisoned");

        if rec.deleting {
            return Err(ReserveError::EventNotFound(id));
        }
        if rec.event.available_tickets < tickets {
            return Err(ReserveError::InsufficientInventory {
                event: id,
                requested: tickets,
                available: rec.event.available_tickets,
            });
        }

        rec.event.available_tickets -= tickets;
        let (status, payment_ref) = book(&rec.event);
        Ok(self.insert_booking(id, purchaser, tickets, rec.event.price, status, payment_ref))
    }

    /// Return a hold's tickets to the pool. Every hold is released at most
    /// once (the status compare-and-set guarantees it), so this clamps and
    /// warns instead of failing if that discipline is ever broken.
    pub(crate) fn release_tickets(&self, id: EventId, tickets: u32) {
        let Some(rec) = self.event_arc(id) else {
            warn!(event = id, tickets, "release for a missing event dropped");
            return;
        };
        let mut rec = rec.lock().expect("lock poisoned");

        let restored = rec.event.available_tickets + tickets;
        if restored > rec.event.total_tickets {
            warn!(
                event = id,
                tickets,
                available = rec.event.available_tickets,
                total = rec.event.total_tickets,
                "release clamped at total capacity"
            );
            rec.event.available_tickets = rec.event.total_tickets;
        } else {
            rec.event.available_tickets = restored;
        }
    }

    // Ledger

    fn insert_booking(
        &self,
        event_id: EventId,
        purchaser: Purchaser,
        tickets: u32,
        unit_price: Amount,
        status: BookingStatus,
        payment_ref: Option<String>,
    ) -> Booking {
        let id = self.next_booking_id.fetch_add(1, Ordering::Relaxed);
        let booking = Booking {
            id,
            event_id,
            purchaser,
            tickets,
            unit_price,
            status,
            created_at: Utc::now(),
            order_ref: None,
            payment_ref,
        };
        self.bookings
            .write()
            .expect("lock poisoned")
            .insert(id, Arc::new(Mutex::new(booking.clone())));
        booking
    }

    /// Attach the provider order reference to a booking and index it for
    /// callback lookups.
    pub(crate) fn set_order_ref(&self, id: BookingId, order_ref: &str) -> Option<Booking> {
        let rec = self.booking_arc(id)?;
        let mut booking = rec.lock().expect("lock poisoned");
        booking.order_ref = Some(order_ref.to_string());
        self.orders
            .write()
            .expect("lock poisoned")
            .insert(order_ref.to_string(), id);
        Some(booking.clone())
    }

    pub(crate) fn booking(&self, id: BookingId) -> Option<Booking> {
        self.booking_arc(id)
            .map(|rec| rec.lock().expect("lock poisoned").clone())
    }

    pub(crate) fn booking_by_order_ref(&self, order_ref: &str) -> Option<Booking> {
        let id = *self
            .orders
            .read()
            .expect("lock poisoned")
            .get(order_ref)?;
        self.booking(id)
    }

    pub(crate) fn bookings_by_email(&self, email: &str) -> Vec<Booking> {
        self.collect_bookings(|b| b.purchaser.email == email)
    }

    /// Non-terminal bookings, the admin listing.
    pub(crate) fn active_bookings(&self) -> Vec<Booking> {
        self.collect_bookings(|b| b.status.is_active())
    }

    pub(crate) fn active_for_event(&self, event_id: EventId) -> Vec<BookingId> {
        self.collect_bookings(|b| b.event_id == event_id && b.status.is_active())
            .into_iter()
            .map(|b| b.id)
            .collect()
    }

    /// PENDING_PAYMENT bookings created at or before the cutoff.
    pub(crate) fn stale_pending(&self, cutoff: DateTime<Utc>) -> Vec<BookingId> {
        self.collect_bookings(|b| {
            b.status == BookingStatus::PendingPayment && b.created_at <= cutoff
        })
        .into_iter()
        .map(|b| b.id)
        .collect()
    }

    fn collect_bookings(&self, keep: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        let arcs: Vec<_> = self
            .bookings
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect();
        let mut bookings: Vec<Booking> = arcs
            .iter()
            .filter_map(|rec| {
                let booking = rec.lock().expect("lock poisoned");
                keep(&booking).then(|| booking.clone())
            })
            .collect();
        bookings.sort_by_key(|b| b.id);
        bookings
    }

    // Status transitions

    /// Compare-and-set on a booking's status: applies `to` only if the
    /// current status is one of `from`. Sets the payment reference on
    /// success when given.
    pub(crate) fn transition(
        &self,
        id: BookingId,
        from: &[BookingStatus],
        to: BookingStatus,
        payment_ref: Option<&str>,
    ) -> Result<Booking, TransitionError> {
        let rec = self.booking_arc(id).ok_or(TransitionError::NotFound)?;
        let mut booking = rec.lock().expect("lock poisoned");

        if !from.contains(&booking.status) {
            return Err(TransitionError::Rejected(booking.status));
        }

        booking.status = to;
        if let Some(payment_ref) = payment_ref {
            booking.payment_ref = Some(payment_ref.to_string());
        }
        Ok(booking.clone())
    }

    /// Like [`transition`](Self::transition), but also returns the booking's
    /// tickets to its event. The release happens while the booking lock is
    /// held, so the status flip and the capacity increment are one atomic
    /// unit (lock order: booking, then event).
    pub(crate) fn transition_released(
        &self,
        id: BookingId,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> Result<Booking, TransitionError> {
        let rec = self.booking_arc(id).ok_or(TransitionError::NotFound)?;
        let mut booking = rec.lock().expect("lock poisoned");

        if !from.contains(&booking.status) {
            return Err(TransitionError::Rejected(booking.status));
        }

        self.release_tickets(booking.event_id, booking.tickets);
        booking.status = to;
        Ok(booking.clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_event(total: u32) -> NewEvent {
        NewEvent {
            title: "RustConf".to_string(),
            description: "talks".to_string(),
            location: "Hall A".to_string(),
            starts_at: Utc::now(),
            price: Amount::from_float(100.0),
            total_tickets: total,
        }
    }

    fn purchaser() -> Purchaser {
        Purchaser::new("Ada", "ada@example.com")
    }

    fn hold(store: &MemoryStore, event: EventId, tickets: u32) -> Result<Booking, ReserveError> {
        store.reserve_booking(event, tickets, purchaser(), |_| {
            (BookingStatus::PendingPayment, None)
        })
    }

    #[test]
    fn insert_event_starts_with_full_availability() {
        let store = MemoryStore::new();
        let event = store.insert_event(new_event(10));
        assert_eq!(event.available_tickets, 10);
        assert_eq!(event.total_tickets, 10);
        assert_eq!(store.event(event.id).unwrap().available_tickets, 10);
    }

    #[test]
    fn reserve_decrements_availability() {
        let store = MemoryStore::new();
        let event = store.insert_event(new_event(10));

        let booking = hold(&store, event.id, 3).unwrap();
        assert_eq!(booking.tickets, 3);
        assert_eq!(booking.unit_price, event.price);
        assert_eq!(store.event(event.id).unwrap().available_tickets, 7);
    }

    #[test]
    fn reserve_inserts_booking_with_the_hold() {
        let store = MemoryStore::new();
        let event = store.insert_event(new_event(10));

        let booking = hold(&store, event.id, 3).unwrap();
        // The row lands with the hold; a deletion scan starting now already
        // sees it, so a hold can never exist without its booking.
        assert_eq!(store.active_for_event(event.id), vec![booking.id]);
        assert_eq!(store.event(event.id).unwrap().available_tickets, 7);
    }

    #[test]
    fn reserve_applies_booked_status_and_reference() {
        let store = MemoryStore::new();
        let event = store.insert_event(new_event(10));

        let booking = store
            .reserve_booking(event.id, 1, purchaser(), |snapshot| {
                // The hold is already taken when the snapshot is handed out.
                assert_eq!(snapshot.available_tickets, 9);
                (BookingStatus::Confirmed, Some("comp".to_string()))
            })
            .unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.payment_ref.as_deref(), Some("comp"));
    }

    #[test]
    fn reserve_more_than_available_fails_untouched() {
        let store = MemoryStore::new();
        let event = store.insert_event(new_event(2));

        let result = hold(&store, event.id, 3);
        assert!(matches!(
            result,
            Err(ReserveError::InsufficientInventory {
                requested: 3,
                available: 2,
                ..
            })
        ));
        assert_eq!(store.event(event.id).unwrap().available_tickets, 2);
        assert!(store.active_for_event(event.id).is_empty());
    }

    #[test]
    fn reserve_unknown_event_fails() {
        let store = MemoryStore::new();
        assert!(matches!(
            hold(&store, 99, 1),
            Err(ReserveError::EventNotFound(99))
        ));
    }

    #[test]
    fn reserve_blocked_while_deleting() {
        let store = MemoryStore::new();
        let event = store.insert_event(new_event(10));

        store.begin_delete(event.id).unwrap();
        assert!(matches!(
            hold(&store, event.id, 1),
            Err(ReserveError::EventNotFound(_))
        ));

        store.abort_delete(event.id);
        assert!(hold(&store, event.id, 1).is_ok());
    }

    #[test]
    fn release_restores_availability_and_clamps() {
        let store = MemoryStore::new();
        let event = store.insert_event(new_event(10));
        hold(&store, event.id, 4).unwrap();

        store.release_tickets(event.id, 4);
        assert_eq!(store.event(event.id).unwrap().available_tickets, 10);

        // A second release of the same hold would overflow; it clamps.
        store.release_tickets(event.id, 4);
        assert_eq!(store.event(event.id).unwrap().available_tickets, 10);
    }

    #[test]
    fn transition_applies_only_from_expected_status() {
        let store = MemoryStore::new();
        let event = store.insert_event(new_event(10));
        let booking = store.insert_booking(
            event.id,
            purchaser(),
            2,
            event.price,
            BookingStatus::PendingPayment,
            None,
        );

        let confirmed = store
            .transition(
                booking.id,
                &[BookingStatus::PendingPayment],
                BookingStatus::Confirmed,
                Some("pay_1"),
            )
            .unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(confirmed.payment_ref.as_deref(), Some("pay_1"));

        // Second CAS loses: status is no longer PENDING_PAYMENT.
        let result = store.transition(
            booking.id,
            &[BookingStatus::PendingPayment],
            BookingStatus::Confirmed,
            Some("pay_2"),
        );
        assert_eq!(
            result.unwrap_err(),
            TransitionError::Rejected(BookingStatus::Confirmed)
        );
        assert_eq!(
            store.booking(booking.id).unwrap().payment_ref.as_deref(),
            Some("pay_1")
        );
    }

    #[test]
    fn transition_released_returns_tickets_once() {
        let store = MemoryStore::new();
        let event = store.insert_event(new_event(10));
        let booking = hold(&store, event.id, 3).unwrap();

        let cancelled = store
            .transition_released(
                booking.id,
                &[BookingStatus::PendingPayment, BookingStatus::Confirmed],
                BookingStatus::Cancelled,
            )
            .unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(store.event(event.id).unwrap().available_tickets, 10);

        // The CAS rejects a second release.
        let result = store.transition_released(
            booking.id,
            &[BookingStatus::PendingPayment, BookingStatus::Confirmed],
            BookingStatus::Cancelled,
        );
        assert_eq!(
            result.unwrap_err(),
            TransitionError::Rejected(BookingStatus::Cancelled)
        );
        assert_eq!(store.event(event.id).unwrap().available_tickets, 10);
    }

    #[test]
    fn order_ref_lookup() {
        let store = MemoryStore::new();
        let event = store.insert_event(new_event(10));
        let booking = store.insert_booking(
            event.id,
            purchaser(),
            1,
            event.price,
            BookingStatus::PendingPayment,
            None,
        );

        assert!(store.booking_by_order_ref("order_1").is_none());
        store.set_order_ref(booking.id, "order_1").unwrap();
        assert_eq!(
            store.booking_by_order_ref("order_1").unwrap().id,
            booking.id
        );
    }

    #[test]
    fn queries_filter_by_email_and_activity() {
        let store = MemoryStore::new();
        let event = store.insert_event(new_event(10));
        let a = store.insert_booking(
            event.id,
            Purchaser::new("Ada", "ada@example.com"),
            1,
            event.price,
            BookingStatus::Confirmed,
            None,
        );
        let b = store.insert_booking(
            event.id,
            Purchaser::new("Grace", "grace@example.com"),
            1,
            event.price,
            BookingStatus::PendingPayment,
            None,
        );
        store
            .transition(
                b.id,
                &[BookingStatus::PendingPayment],
                BookingStatus::Failed,
                None,
            )
            .unwrap();

        let by_email = store.bookings_by_email("ada@example.com");
        assert_eq!(by_email.len(), 1);
        assert_eq!(by_email[0].id, a.id);

        let active = store.active_bookings();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);

        assert_eq!(store.active_for_event(event.id), vec![a.id]);
    }

    #[test]
    fn stale_pending_respects_cutoff_and_status() {
        let store = MemoryStore::new();
        let event = store.insert_event(new_event(10));
        let pending = store.insert_booking(
            event.id,
            purchaser(),
            1,
            event.price,
            BookingStatus::PendingPayment,
            None,
        );
        store.insert_booking(
            event.id,
            purchaser(),
            1,
            event.price,
            BookingStatus::Confirmed,
            None,
        );

        // Cutoff in the past: nothing is stale yet.
        assert!(
            store
                .stale_pending(Utc::now() - chrono::Duration::minutes(5))
                .is_empty()
        );
        // Cutoff now: only the pending booking qualifies.
        assert_eq!(store.stale_pending(Utc::now()), vec![pending.id]);
    }

    #[test]
    fn update_event_adjusts_capacity_around_holds() {
        let store = MemoryStore::new();
        let event = store.insert_event(new_event(10));
        hold(&store, event.id, 4).unwrap();

        // 6 available of 10, 4 held. Growing to 12 keeps the 4 held.
        let updated = store
            .update_event(
                event.id,
                EventUpdate {
                    total_tickets: Some(12),
                    ..EventUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.total_tickets, 12);
        assert_eq!(updated.available_tickets, 8);

        // Shrinking below the held count is refused.
        let result = store.update_event(
            event.id,
            EventUpdate {
                total_tickets: Some(3),
                ..EventUpdate::default()
            },
        );
        assert!(matches!(
            result,
            Err(CatalogError::CapacityBelowHeld {
                requested: 3,
                held: 4
            })
        ));
    }

    #[test]
    fn update_event_rejects_negative_price() {
        let store = MemoryStore::new();
        let event = store.insert_event(new_event(10));
        let result = store.update_event(
            event.id,
            EventUpdate {
                price: Some(Amount::from_scaled(-1)),
                ..EventUpdate::default()
            },
        );
        assert!(matches!(result, Err(CatalogError::InvalidEvent(_))));
    }
}
