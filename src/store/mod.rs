//! Durable home of the seat maps and the booking ledger.
//!
//! Every write to either goes through [`BookingStore`]. Implementations must
//! make `reserve`, `release`, `confirm` and `expire` atomic with respect to
//! each other for the same event: a reservation checks and claims its seats
//! and creates the `pending` booking in one step, and a transition re-reads the
//! booking status in the same step that changes it.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ReleaseError, ReservationError, StoreError};
use crate::ledger::{ConfirmOutcome, ExpireOutcome, ReleaseOutcome};
use crate::models::{Booking, BookingId, Event, EventId, NewEvent, NewHold, SeatSnapshot};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert_event(&self, event: NewEvent) -> Result<Event, StoreError>;

    async fn load_event(&self, id: EventId) -> Result<Option<Event>, StoreError>;

    async fn seat_snapshot(&self, id: EventId) -> Result<Option<SeatSnapshot>, StoreError>;

    /// Claims all of `hold.seats` and records a `pending` booking, or does
    /// nothing at all.
    async fn reserve(&self, hold: NewHold) -> Result<Booking, ReservationError>;

    /// Frees whatever seats are still recorded against a settled booking.
    async fn release(&self, id: BookingId) -> Result<ReleaseOutcome, ReleaseError>;

    async fn confirm(&self, id: BookingId, at: DateTime<Utc>) -> Result<ConfirmOutcome, StoreError>;

    /// Moves a `pending` booking to `expired` and frees its seats together.
    async fn expire(&self, id: BookingId, at: DateTime<Utc>) -> Result<ExpireOutcome, StoreError>;

    /// Returns `false` when the booking is unknown.
    async fn attach_payment_reference(&self, id: BookingId, reference: &str) -> Result<bool, StoreError>;

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Booking>, StoreError>;

    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    async fn bookings_for_requester(&self, requester_id: &str) -> Result<Vec<Booking>, StoreError>;

    async fn pending_bookings(&self) -> Result<Vec<Booking>, StoreError>;

    /// Pending bookings whose hold window has elapsed at `now`.
    async fn stale_pending(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>, StoreError>;

    /// Sets the one-shot confirmation flag of a paid booking. Only the first
    /// caller gets `true`.
    async fn claim_confirmation_notice(&self, id: BookingId, at: DateTime<Utc>) -> Result<bool, StoreError>;
}
