use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cache::CacheService;
use crate::config::{BookingConfig, PaymentConfig};
use crate::error::{ReleaseError, ReservationError, StoreError};
use crate::ledger::ReleaseOutcome;
use crate::models::{Booking, BookingId, Event, EventId, NewHold, SeatId, SeatSnapshot};
use crate::services::payment::{CheckoutRequest, PaymentGateway};
use crate::services::scheduler::ExpiryScheduler;
use crate::store::BookingStore;

/// What the requester gets back from a successful booking request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationReceipt {
    pub booking_id: BookingId,
    pub payment_reference: String,
    pub redirect_url: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub expires_at: DateTime<Utc>,
}

/// Entry point for claiming and releasing seats.
///
/// Seat checks and claims happen inside [`BookingStore::reserve`]; this
/// service validates input, arms the hold timer and talks to the payment
/// gateway, always outside any store lock.
pub struct SeatReservationService {
    store: Arc<dyn BookingStore>,
    gateway: Arc<dyn PaymentGateway>,
    scheduler: ExpiryScheduler,
    cache: Option<CacheService>,
    rules: BookingConfig,
    success_url: String,
    cancel_url: String,
}

impl SeatReservationService {
    pub fn new(
        store: Arc<dyn BookingStore>,
        gateway: Arc<dyn PaymentGateway>,
        scheduler: ExpiryScheduler,
        rules: BookingConfig,
        payment: &PaymentConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            scheduler,
            cache: None,
            rules,
            success_url: payment.success_url.clone(),
            cancel_url: payment.fail_url.clone(),
        }
    }

    pub fn with_cache(mut self, cache: Option<CacheService>) -> Self {
        self.cache = cache;
        self
    }

    pub fn rules(&self) -> &BookingConfig {
        &self.rules
    }

    /// Atomically claims `seat_ids` for a new pending booking and arms its
    /// expiry timer. Either every seat is claimed or none is.
    pub async fn try_reserve(
        &self,
        event_id: EventId,
        requester_id: &str,
        seat_ids: Vec<SeatId>,
    ) -> Result<Booking, ReservationError> {
        let requester_id = requester_id.trim();
        if requester_id.is_empty() {
            return Err(ReservationError::MissingRequester);
        }
        let seats = normalize_seats(seat_ids, self.rules.max_seats_per_booking)?;

        let now = Utc::now();
        let hold = NewHold {
            booking_id: BookingId::new(),
            event_id,
            requester_id: requester_id.to_string(),
            seats,
            created_at: now,
            expires_at: now + self.rules.hold_window_delta(),
        };

        let booking = match self.store.reserve(hold).await {
            Ok(booking) => booking,
            Err(ReservationError::SeatsUnavailable { seats }) => {
                info!(%event_id, "Seats already taken: {}", seats.join(", "));
                return Err(ReservationError::SeatsUnavailable { seats });
            }
            Err(e) => return Err(e),
        };

        self.scheduler.arm(booking.id, booking.expires_at);
        self.invalidate(event_id).await;
        info!(
            booking_id = %booking.id,
            %event_id,
            seats = booking.seats.len(),
            "🎫 Seats held until {}",
            booking.expires_at
        );
        Ok(booking)
    }

    /// Holds the seats and opens a payment session for them.
    ///
    /// If no session can be opened the hold is expired on the spot, so the
    /// seats never stay claimed without a path to payment.
    pub async fn book(
        &self,
        event_id: EventId,
        requester_id: &str,
        seat_ids: Vec<SeatId>,
    ) -> Result<ReservationReceipt, ReservationError> {
        let booking = self.try_reserve(event_id, requester_id, seat_ids).await?;

        let request = CheckoutRequest {
            booking_id: booking.id,
            amount: booking.amount,
            currency: self.rules.currency.clone(),
            description: format!("Booking {} - {} seat(s)", booking.id, booking.seats.len()),
            success_url: self.success_url.clone(),
            cancel_url: self.cancel_url.clone(),
            expires_at: booking.expires_at,
        };

        let session = match self.gateway.create_session(&request).await {
            Ok(session) => session,
            Err(e) => {
                warn!(booking_id = %booking.id, "Payment session failed, releasing hold: {}", e);
                self.compensate(booking.id).await;
                return Err(ReservationError::Gateway(e));
            }
        };

        match self
            .store
            .attach_payment_reference(booking.id, &session.payment_reference)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return Err(StoreError::Corrupt(format!("booking {} vanished after reserve", booking.id)).into());
            }
            Err(e) => {
                error!(booking_id = %booking.id, "Failed to store payment reference: {}", e);
                self.compensate(booking.id).await;
                return Err(e.into());
            }
        }

        info!(
            booking_id = %booking.id,
            payment_reference = %session.payment_reference,
            "💳 Payment session opened"
        );
        Ok(ReservationReceipt {
            booking_id: booking.id,
            payment_reference: session.payment_reference,
            redirect_url: session.redirect_url,
            amount: booking.amount,
            currency: self.rules.currency.clone(),
            expires_at: booking.expires_at,
        })
    }

    async fn compensate(&self, id: BookingId) {
        if let Err(e) = self.scheduler.abort_hold(id).await {
            // Sweep picks the hold up once its window elapses.
            error!(booking_id = %id, "Compensating release failed: {}", e);
        }
    }

    /// Frees the seats recorded on a settled booking. Repeated calls are no-ops.
    pub async fn release(&self, id: BookingId) -> Result<ReleaseOutcome, ReleaseError> {
        let outcome = self.store.release(id).await?;
        if let ReleaseOutcome::Released(ref seats) = outcome {
            info!(booking_id = %id, "Released {} seats", seats.len());
            if let Ok(Some(booking)) = self.store.get_booking(id).await {
                self.invalidate(booking.event_id).await;
            }
        }
        Ok(outcome)
    }

    pub async fn load_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        self.store.load_event(id).await
    }

    /// Point-in-time list of occupied seats. Advisory only.
    pub async fn seat_snapshot(&self, id: EventId) -> Result<Option<SeatSnapshot>, StoreError> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get_seat_snapshot(id).await {
                return Ok(Some(hit));
            }
        }

        let snapshot = self.store.seat_snapshot(id).await?;
        if let (Some(cache), Some(snapshot)) = (&self.cache, &snapshot) {
            cache.save_seat_snapshot(snapshot).await;
        }
        Ok(snapshot)
    }

    pub async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        self.store.get_booking(id).await
    }

    pub async fn bookings_for_requester(&self, requester_id: &str) -> Result<Vec<Booking>, StoreError> {
        self.store.bookings_for_requester(requester_id).await
    }

    async fn invalidate(&self, event_id: EventId) {
        if let Some(cache) = &self.cache {
            cache.invalidate_seats(event_id).await;
        }
    }
}

/// Trims seat ids and enforces: non-empty, bounded, no blanks, no duplicates.
fn normalize_seats(seat_ids: Vec<SeatId>, max: usize) -> Result<Vec<SeatId>, ReservationError> {
    if seat_ids.is_empty() {
        return Err(ReservationError::InvalidSeats("at least one seat is required".to_string()));
    }
    if seat_ids.len() > max {
        return Err(ReservationError::TooManySeats {
            requested: seat_ids.len(),
            max,
        });
    }

    let mut seen = HashSet::with_capacity(seat_ids.len());
    let mut seats = Vec::with_capacity(seat_ids.len());
    for raw in seat_ids {
        let seat = raw.trim();
        if seat.is_empty() {
            return Err(ReservationError::InvalidSeats("seat id must not be blank".to_string()));
        }
        if !seen.insert(seat.to_string()) {
            return Err(ReservationError::InvalidSeats(format!("duplicate seat {seat}")));
        }
        seats.push(seat.to_string());
    }
    Ok(seats)
}
