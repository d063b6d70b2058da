use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::BookingStore;
use crate::error::{ReleaseError, ReservationError, StoreError};
use crate::ledger::{self, ConfirmOutcome, ExpireOutcome, ReleaseOutcome, Transition};
use crate::models::seat::ClaimConflict;
use crate::models::{
    Booking, BookingId, BookingStatus, Event, EventId, NewEvent, NewHold, SeatSnapshot,
};

/// In-process store. Each event sits behind its own mutex, and every seat
/// mutation or status transition of a booking happens while holding the mutex
/// of that booking's event.
#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<EventId, Arc<Mutex<Event>>>>,
    bookings: RwLock<HashMap<BookingId, Booking>>,
    payment_refs: RwLock<HashMap<String, BookingId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn event_slot(&self, id: EventId) -> Option<Arc<Mutex<Event>>> {
        self.events.read().await.get(&id).cloned()
    }

    async fn booking_event(&self, id: BookingId) -> Option<EventId> {
        self.bookings.read().await.get(&id).map(|b| b.event_id)
    }

    async fn slot_for_booking(&self, id: BookingId) -> Result<Option<Arc<Mutex<Event>>>, StoreError> {
        let Some(event_id) = self.booking_event(id).await else {
            return Ok(None);
        };
        self.event_slot(event_id)
            .await
            .map(Some)
            .ok_or_else(|| StoreError::Corrupt(format!("booking {id} references missing event {event_id}")))
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn insert_event(&self, event: NewEvent) -> Result<Event, StoreError> {
        let event = event.into_event(EventId::new());
        self.events
            .write()
            .await
            .insert(event.id, Arc::new(Mutex::new(event.clone())));
        Ok(event)
    }

    async fn load_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        match self.event_slot(id).await {
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn seat_snapshot(&self, id: EventId) -> Result<Option<SeatSnapshot>, StoreError> {
        match self.event_slot(id).await {
            Some(slot) => Ok(Some(slot.lock().await.seats.snapshot(id))),
            None => Ok(None),
        }
    }

    async fn reserve(&self, hold: NewHold) -> Result<Booking, ReservationError> {
        let slot = self
            .event_slot(hold.event_id)
            .await
            .ok_or(ReservationError::EventNotFound)?;
        let mut event = slot.lock().await;

        match event.seats.try_claim(&hold.seats, hold.booking_id) {
            Ok(()) => {}
            Err(ClaimConflict::Taken(seats)) => return Err(ReservationError::SeatsUnavailable { seats }),
            Err(ClaimConflict::Unknown(seats)) => {
                return Err(ReservationError::InvalidSeats(format!(
                    "not on the seat map: {}",
                    seats.join(", ")
                )))
            }
        }

        let amount = event.price_for(hold.seats.len());
        let booking = hold.into_booking(amount);
        self.bookings.write().await.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn release(&self, id: BookingId) -> Result<ReleaseOutcome, ReleaseError> {
        let slot = self.slot_for_booking(id).await?.ok_or(ReleaseError::BookingNotFound)?;
        let mut event = slot.lock().await;

        let status = self
            .bookings
            .read()
            .await
            .get(&id)
            .map(|b| b.status)
            .ok_or(ReleaseError::BookingNotFound)?;
        if status.holds_seats() {
            return Err(ReleaseError::BookingActive { status });
        }

        Ok(ReleaseOutcome::from_freed(event.seats.release_held_by(id)))
    }

    async fn confirm(&self, id: BookingId, at: DateTime<Utc>) -> Result<ConfirmOutcome, StoreError> {
        let Some(slot) = self.slot_for_booking(id).await? else {
            return Ok(ConfirmOutcome::NotFound);
        };
        let _event = slot.lock().await;

        let mut bookings = self.bookings.write().await;
        let Some(booking) = bookings.get_mut(&id) else {
            return Ok(ConfirmOutcome::NotFound);
        };
        let transition = ledger::mark_paid(booking, at);
        Ok(ConfirmOutcome::from_transition(transition, booking.clone()))
    }

    async fn expire(&self, id: BookingId, at: DateTime<Utc>) -> Result<ExpireOutcome, StoreError> {
        let Some(slot) = self.slot_for_booking(id).await? else {
            return Ok(ExpireOutcome::NotFound);
        };
        let mut event = slot.lock().await;

        let mut bookings = self.bookings.write().await;
        let Some(booking) = bookings.get_mut(&id) else {
            return Ok(ExpireOutcome::NotFound);
        };
        match ledger::mark_expired(booking, at) {
            Transition::Applied => {
                let released = event.seats.release_held_by(id);
                Ok(ExpireOutcome::Expired { booking: booking.clone(), released })
            }
            Transition::Conflict(BookingStatus::Paid) => Ok(ExpireOutcome::AlreadyPaid(booking.clone())),
            Transition::AlreadyInTarget | Transition::Conflict(_) => {
                Ok(ExpireOutcome::AlreadySettled(booking.clone()))
            }
        }
    }

    async fn attach_payment_reference(&self, id: BookingId, reference: &str) -> Result<bool, StoreError> {
        let mut bookings = self.bookings.write().await;
        let Some(booking) = bookings.get_mut(&id) else {
            return Ok(false);
        };
        booking.payment_reference = Some(reference.to_string());
        self.payment_refs.write().await.insert(reference.to_string(), id);
        Ok(true)
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Booking>, StoreError> {
        let id = self.payment_refs.read().await.get(reference).copied();
        match id {
            Some(id) => self.get_booking(id).await,
            None => Ok(None),
        }
    }

    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.read().await.get(&id).cloned())
    }

    async fn bookings_for_requester(&self, requester_id: &str) -> Result<Vec<Booking>, StoreError> {
        let mut found: Vec<Booking> = self
            .bookings
            .read()
            .await
            .values()
            .filter(|b| b.requester_id == requester_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn pending_bookings(&self) -> Result<Vec<Booking>, StoreError> {
        Ok(self
            .bookings
            .read()
            .await
            .values()
            .filter(|b| b.status == BookingStatus::Pending)
            .cloned()
            .collect())
    }

    async fn stale_pending(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>, StoreError> {
        let mut stale: Vec<(DateTime<Utc>, BookingId)> = self
            .bookings
            .read()
            .await
            .values()
            .filter(|b| b.is_overdue(now))
            .map(|b| (b.expires_at, b.id))
            .collect();
        stale.sort();
        Ok(stale.into_iter().map(|(_, id)| id).collect())
    }

    async fn claim_confirmation_notice(&self, id: BookingId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(&id) {
            Some(booking) if booking.status == BookingStatus::Paid && booking.confirmation_notified_at.is_none() => {
                booking.confirmation_notified_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
