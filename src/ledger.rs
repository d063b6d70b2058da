//! Booking status machine.
//!
//! ```text
//! pending ──confirm──▶ paid      (webhook processor)
//!    │
//!    └──────expire───▶ expired   (expiry scheduler, seats released)
//! failed                         (creation aborted, never held seats)
//! ```
//!
//! Terminal states never change. Stores call these functions while holding
//! whatever exclusion protects the booking, so the check of the current status
//! and the write of the new one form a single step.

use chrono::{DateTime, Utc};

use crate::models::{Booking, BookingStatus, SeatId};

/// What happened when a transition was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The booking already sits in the requested state; nothing changed.
    AlreadyInTarget,
    /// The booking is in a different terminal state; nothing changed.
    Conflict(BookingStatus),
}

pub fn can_transition(from: BookingStatus, to: BookingStatus) -> bool {
    matches!(
        (from, to),
        (BookingStatus::Pending, BookingStatus::Paid) | (BookingStatus::Pending, BookingStatus::Expired)
    )
}

fn check(from: BookingStatus, to: BookingStatus) -> Option<Transition> {
    if from == to {
        Some(Transition::AlreadyInTarget)
    } else if !can_transition(from, to) {
        Some(Transition::Conflict(from))
    } else {
        None
    }
}

pub fn mark_paid(booking: &mut Booking, at: DateTime<Utc>) -> Transition {
    if let Some(refused) = check(booking.status, BookingStatus::Paid) {
        return refused;
    }
    booking.status = BookingStatus::Paid;
    booking.paid_at = Some(at);
    Transition::Applied
}

pub fn mark_expired(booking: &mut Booking, at: DateTime<Utc>) -> Transition {
    if let Some(refused) = check(booking.status, BookingStatus::Expired) {
        return refused;
    }
    booking.status = BookingStatus::Expired;
    booking.expired_at = Some(at);
    Transition::Applied
}

/// Outcome of a `pending -> paid` request as seen by the webhook processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed(Booking),
    AlreadyPaid(Booking),
    /// Confirmation arrived after the booking left `pending` for a state other
    /// than `paid`. The booking is returned untouched.
    Late(Booking),
    NotFound,
}

impl ConfirmOutcome {
    pub fn from_transition(transition: Transition, booking: Booking) -> Self {
        match transition {
            Transition::Applied => ConfirmOutcome::Confirmed(booking),
            Transition::AlreadyInTarget => ConfirmOutcome::AlreadyPaid(booking),
            Transition::Conflict(_) => ConfirmOutcome::Late(booking),
        }
    }
}

/// Outcome of a `pending -> expired` request as seen by the expiry scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpireOutcome {
    Expired { booking: Booking, released: Vec<SeatId> },
    AlreadyPaid(Booking),
    AlreadySettled(Booking),
    NotFound,
}

/// Outcome of an idempotent seat release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released(Vec<SeatId>),
    AlreadyReleased,
}

impl ReleaseOutcome {
    pub fn from_freed(freed: Vec<SeatId>) -> Self {
        if freed.is_empty() {
            ReleaseOutcome::AlreadyReleased
        } else {
            ReleaseOutcome::Released(freed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingId, EventId, NewHold};
    use chrono::Duration;

    fn pending() -> Booking {
        let now = Utc::now();
        NewHold {
            booking_id: BookingId::new(),
            event_id: EventId::new(),
            requester_id: "user-1".to_string(),
            seats: vec!["A1".to_string()],
            created_at: now,
            expires_at: now + Duration::minutes(10),
        }
        .into_booking(1_000)
    }

    #[test]
    fn only_pending_moves_to_paid_or_expired() {
        use BookingStatus::*;
        assert!(can_transition(Pending, Paid));
        assert!(can_transition(Pending, Expired));
        for from in [Paid, Expired, Failed] {
            for to in [Pending, Paid, Expired, Failed] {
                assert!(!can_transition(from, to), "{from} -> {to} must be refused");
            }
        }
        assert!(!can_transition(Pending, Failed));
    }

    #[test]
    fn failed_booking_refuses_both_transitions() {
        let mut booking = pending();
        booking.status = BookingStatus::Failed;
        let before = booking.clone();
        assert_eq!(mark_paid(&mut booking, Utc::now()), Transition::Conflict(BookingStatus::Failed));
        assert_eq!(mark_expired(&mut booking, Utc::now()), Transition::Conflict(BookingStatus::Failed));
        assert_eq!(booking, before);
    }

    #[test]
    fn paid_is_idempotent_and_keeps_first_timestamp() {
        let mut booking = pending();
        let first = Utc::now();
        assert_eq!(mark_paid(&mut booking, first), Transition::Applied);
        assert_eq!(mark_paid(&mut booking, first + Duration::seconds(5)), Transition::AlreadyInTarget);
        assert_eq!(booking.paid_at, Some(first));
        assert_eq!(booking.status, BookingStatus::Paid);
    }

    #[test]
    fn expiry_loses_against_payment() {
        let mut booking = pending();
        mark_paid(&mut booking, Utc::now());
        let before = booking.clone();
        assert_eq!(
            mark_expired(&mut booking, Utc::now()),
            Transition::Conflict(BookingStatus::Paid)
        );
        assert_eq!(booking, before);
    }

    #[test]
    fn payment_after_expiry_is_a_conflict() {
        let mut booking = pending();
        assert_eq!(mark_expired(&mut booking, Utc::now()), Transition::Applied);
        let before = booking.clone();
        let transition = mark_paid(&mut booking, Utc::now());
        assert_eq!(transition, Transition::Conflict(BookingStatus::Expired));
        assert_eq!(booking, before);
        assert!(matches!(
            ConfirmOutcome::from_transition(transition, booking),
            ConfirmOutcome::Late(_)
        ));
    }
}
