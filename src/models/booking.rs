use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{BookingId, EventId, SeatId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "booking_status", rename_all = "lowercase")]
pub enum BookingStatus {
    /// Seats are held while payment is outstanding.
    Pending,
    /// Payment confirmed; seats are held permanently.
    Paid,
    /// Hold window elapsed without payment; seats were released.
    Expired,
    /// Creation was aborted before any seat was held.
    Failed,
}

impl BookingStatus {
    /// Whether a booking in this status holds its seats.
    pub fn holds_seats(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Paid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Paid => "paid",
            BookingStatus::Expired => "expired",
            BookingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reservation attempt and its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: BookingId,
    pub requester_id: String,
    pub event_id: EventId,
    pub seats: Vec<SeatId>,
    pub amount: i64,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    /// Durable fire-at time of the hold timer.
    pub expires_at: DateTime<Utc>,
    pub payment_reference: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub confirmation_notified_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == BookingStatus::Pending && self.expires_at <= now
    }
}

/// Input of the atomic reserve operation. Seats are already validated.
#[derive(Debug, Clone)]
pub struct NewHold {
    pub booking_id: BookingId,
    pub event_id: EventId,
    pub requester_id: String,
    pub seats: Vec<SeatId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewHold {
    pub fn into_booking(self, amount: i64) -> Booking {
        Booking {
            id: self.booking_id,
            requester_id: self.requester_id,
            event_id: self.event_id,
            seats: self.seats,
            amount,
            status: BookingStatus::Pending,
            created_at: self.created_at,
            expires_at: self.expires_at,
            payment_reference: None,
            paid_at: None,
            expired_at: None,
            confirmation_notified_at: None,
        }
    }
}
