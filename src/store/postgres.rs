use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::BookingStore;
use crate::database::Database;
use crate::error::{ReleaseError, ReservationError, StoreError};
use crate::ledger::{self, ConfirmOutcome, ExpireOutcome, ReleaseOutcome, Transition};
use crate::models::{
    Booking, BookingId, BookingStatus, Event, EventId, NewEvent, NewHold, SeatId, SeatMap,
    SeatSnapshot,
};

const BOOKING_COLUMNS: &str = "id, requester_id, event_id, seats, amount, status, created_at, \
     expires_at, payment_reference, paid_at, expired_at, confirmation_notified_at";

#[derive(sqlx::FromRow)]
struct EventRow {
    id: EventId,
    title: String,
    item_ref: String,
    starts_at: DateTime<Utc>,
    unit_price: i64,
}

/// Postgres-backed store.
///
/// Seats are claimed with a single conditional `UPDATE … WHERE booking_id IS
/// NULL`; the transaction commits only if every requested row matched.
/// Transitions lock the booking row before re-checking its status.
#[derive(Clone)]
pub struct PgStore {
    db: Database,
}

impl PgStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn seat_map(&self, event_id: EventId) -> Result<SeatMap, StoreError> {
        let rows: Vec<(SeatId, Option<BookingId>)> = sqlx::query_as(
            "SELECT seat_id, booking_id FROM event_seats WHERE event_id = $1 ORDER BY seat_id",
        )
        .bind(event_id)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(SeatMap::from_occupants(rows))
    }

    async fn lock_booking(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: BookingId,
    ) -> Result<Option<Booking>, sqlx::Error> {
        sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn insert_event(&self, event: NewEvent) -> Result<Event, StoreError> {
        let event = event.into_event(EventId::new());
        let seat_ids: Vec<SeatId> = event.seats.seat_ids().cloned().collect();

        let mut tx = self.db.pool.begin().await?;
        sqlx::query(
            "INSERT INTO events (id, title, item_ref, starts_at, unit_price) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event.id)
        .bind(&event.title)
        .bind(&event.item_ref)
        .bind(event.starts_at)
        .bind(event.unit_price)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO event_seats (event_id, seat_id) SELECT $1, UNNEST($2::text[])")
            .bind(event.id)
            .bind(&seat_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(event)
    }

    async fn load_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        let row: Option<EventRow> = sqlx::query_as(
            "SELECT id, title, item_ref, starts_at, unit_price FROM events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let seats = self.seat_map(id).await?;
        Ok(Some(Event {
            id: row.id,
            title: row.title,
            item_ref: row.item_ref,
            starts_at: row.starts_at,
            unit_price: row.unit_price,
            seats,
        }))
    }

    async fn seat_snapshot(&self, id: EventId) -> Result<Option<SeatSnapshot>, StoreError> {
        Ok(self.load_event(id).await?.map(|event| event.seats.snapshot(id)))
    }

    async fn reserve(&self, hold: NewHold) -> Result<Booking, ReservationError> {
        let mut tx = self.db.pool.begin().await.map_err(StoreError::from)?;

        let unit_price: Option<i64> = sqlx::query_scalar("SELECT unit_price FROM events WHERE id = $1")
            .bind(hold.event_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        let Some(unit_price) = unit_price else {
            return Err(ReservationError::EventNotFound);
        };

        // Строки мест блокируются в порядке seat_id, пересекающиеся брони ждут друг друга без дедлоков
        let known: Vec<SeatId> = sqlx::query_scalar(
            "SELECT seat_id FROM event_seats WHERE event_id = $1 AND seat_id = ANY($2)
             ORDER BY seat_id FOR UPDATE",
        )
        .bind(hold.event_id)
        .bind(&hold.seats)
        .fetch_all(&mut *tx)
        .await
        .map_err(StoreError::from)?;
        let unknown: Vec<&str> = hold
            .seats
            .iter()
            .filter(|s| !known.contains(s))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(ReservationError::InvalidSeats(format!(
                "not on the seat map: {}",
                unknown.join(", ")
            )));
        }

        let booking = hold.into_booking(unit_price.saturating_mul(known.len() as i64));
        sqlx::query(
            "INSERT INTO bookings (id, requester_id, event_id, seats, amount, status, created_at, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(booking.id)
        .bind(&booking.requester_id)
        .bind(booking.event_id)
        .bind(&booking.seats)
        .bind(booking.amount)
        .bind(booking.status)
        .bind(booking.created_at)
        .bind(booking.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        let claimed: Vec<SeatId> = sqlx::query_scalar(
            "UPDATE event_seats SET booking_id = $1
             WHERE event_id = $2 AND seat_id = ANY($3) AND booking_id IS NULL
             RETURNING seat_id",
        )
        .bind(booking.id)
        .bind(booking.event_id)
        .bind(&booking.seats)
        .fetch_all(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        if claimed.len() != booking.seats.len() {
            tx.rollback().await.map_err(StoreError::from)?;
            let seats = booking
                .seats
                .iter()
                .filter(|s| !claimed.contains(s))
                .cloned()
                .collect();
            return Err(ReservationError::SeatsUnavailable { seats });
        }

        tx.commit().await.map_err(StoreError::from)?;
        debug!(booking_id = %booking.id, event_id = %booking.event_id, "seats claimed");
        Ok(booking)
    }

    async fn release(&self, id: BookingId) -> Result<ReleaseOutcome, ReleaseError> {
        let mut tx = self.db.pool.begin().await.map_err(StoreError::from)?;

        let booking = Self::lock_booking(&mut tx, id)
            .await
            .map_err(StoreError::from)?
            .ok_or(ReleaseError::BookingNotFound)?;
        if booking.status.holds_seats() {
            return Err(ReleaseError::BookingActive { status: booking.status });
        }

        let freed: Vec<SeatId> = sqlx::query_scalar(
            "UPDATE event_seats SET booking_id = NULL
             WHERE event_id = $1 AND booking_id = $2
             RETURNING seat_id",
        )
        .bind(booking.event_id)
        .bind(id)
        .fetch_all(&mut *tx)
        .await
        .map_err(StoreError::from)?;
        tx.commit().await.map_err(StoreError::from)?;

        Ok(ReleaseOutcome::from_freed(freed))
    }

    async fn confirm(&self, id: BookingId, at: DateTime<Utc>) -> Result<ConfirmOutcome, StoreError> {
        let mut tx = self.db.pool.begin().await?;
        let Some(mut booking) = Self::lock_booking(&mut tx, id).await? else {
            return Ok(ConfirmOutcome::NotFound);
        };

        let transition = ledger::mark_paid(&mut booking, at);
        if transition == Transition::Applied {
            sqlx::query("UPDATE bookings SET status = $2, paid_at = $3 WHERE id = $1")
                .bind(id)
                .bind(BookingStatus::Paid)
                .bind(at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(ConfirmOutcome::from_transition(transition, booking))
    }

    async fn expire(&self, id: BookingId, at: DateTime<Utc>) -> Result<ExpireOutcome, StoreError> {
        let mut tx = self.db.pool.begin().await?;
        let Some(mut booking) = Self::lock_booking(&mut tx, id).await? else {
            return Ok(ExpireOutcome::NotFound);
        };

        let outcome = match ledger::mark_expired(&mut booking, at) {
            Transition::Applied => {
                sqlx::query("UPDATE bookings SET status = $2, expired_at = $3 WHERE id = $1")
                    .bind(id)
                    .bind(BookingStatus::Expired)
                    .bind(at)
                    .execute(&mut *tx)
                    .await?;
                let released: Vec<SeatId> = sqlx::query_scalar(
                    "UPDATE event_seats SET booking_id = NULL
                     WHERE event_id = $1 AND booking_id = $2
                     RETURNING seat_id",
                )
                .bind(booking.event_id)
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;
                ExpireOutcome::Expired { booking, released }
            }
            Transition::Conflict(BookingStatus::Paid) => ExpireOutcome::AlreadyPaid(booking),
            Transition::AlreadyInTarget | Transition::Conflict(_) => ExpireOutcome::AlreadySettled(booking),
        };
        tx.commit().await?;

        Ok(outcome)
    }

    async fn attach_payment_reference(&self, id: BookingId, reference: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE bookings SET payment_reference = $2 WHERE id = $1")
            .bind(id)
            .bind(reference)
            .execute(&self.db.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Booking>, StoreError> {
        Ok(sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE payment_reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.db.pool)
        .await?)
    }

    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?)
    }

    async fn bookings_for_requester(&self, requester_id: &str) -> Result<Vec<Booking>, StoreError> {
        Ok(sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE requester_id = $1 ORDER BY created_at DESC"
        ))
        .bind(requester_id)
        .fetch_all(&self.db.pool)
        .await?)
    }

    async fn pending_bookings(&self) -> Result<Vec<Booking>, StoreError> {
        Ok(sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE status = 'pending' ORDER BY expires_at"
        ))
        .fetch_all(&self.db.pool)
        .await?)
    }

    async fn stale_pending(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>, StoreError> {
        Ok(sqlx::query_scalar(
            "SELECT id FROM bookings WHERE status = 'pending' AND expires_at <= $1 ORDER BY expires_at",
        )
        .bind(now)
        .fetch_all(&self.db.pool)
        .await?)
    }

    async fn claim_confirmation_notice(&self, id: BookingId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE bookings SET confirmation_notified_at = $2
             WHERE id = $1 AND status = 'paid' AND confirmation_notified_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
