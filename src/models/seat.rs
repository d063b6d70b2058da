use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{BookingId, EventId};

/// Seat token within an event, e.g. `A1` (row + number).
pub type SeatId = String;

/// Seat layout of one event: every seat maps to the booking holding it, or to
/// nothing when free.
///
/// A seat only moves `free -> held(B)` through [`SeatMap::try_claim`] and
/// `held(B) -> free` through [`SeatMap::release_held_by`] for the same `B`;
/// there is no way to overwrite one holder with another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatMap {
    occupants: BTreeMap<SeatId, Option<BookingId>>,
}

/// Why a claim was refused. No seat is touched in either case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimConflict {
    Unknown(Vec<SeatId>),
    Taken(Vec<SeatId>),
}

impl SeatMap {
    pub fn with_layout<I, S>(seats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SeatId>,
    {
        Self {
            occupants: seats.into_iter().map(|s| (s.into(), None)).collect(),
        }
    }

    pub fn from_occupants<I>(occupants: I) -> Self
    where
        I: IntoIterator<Item = (SeatId, Option<BookingId>)>,
    {
        Self {
            occupants: occupants.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.occupants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }

    pub fn contains(&self, seat: &str) -> bool {
        self.occupants.contains_key(seat)
    }

    pub fn occupant(&self, seat: &str) -> Option<BookingId> {
        self.occupants.get(seat).copied().flatten()
    }

    pub fn is_free(&self, seat: &str) -> bool {
        matches!(self.occupants.get(seat), Some(None))
    }

    pub fn seat_ids(&self) -> impl Iterator<Item = &SeatId> {
        self.occupants.keys()
    }

    pub fn occupied(&self) -> Vec<SeatId> {
        self.occupants
            .iter()
            .filter(|(_, holder)| holder.is_some())
            .map(|(seat, _)| seat.clone())
            .collect()
    }

    pub fn seats_held_by(&self, booking: BookingId) -> Vec<SeatId> {
        self.occupants
            .iter()
            .filter(|(_, holder)| **holder == Some(booking))
            .map(|(seat, _)| seat.clone())
            .collect()
    }

    /// Claims every seat in `seats` for `booking`, or none of them.
    pub(crate) fn try_claim(&mut self, seats: &[SeatId], booking: BookingId) -> Result<(), ClaimConflict> {
        let unknown: Vec<SeatId> = seats
            .iter()
            .filter(|s| !self.contains(s))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(ClaimConflict::Unknown(unknown));
        }

        let taken: Vec<SeatId> = seats
            .iter()
            .filter(|s| !self.is_free(s))
            .cloned()
            .collect();
        if !taken.is_empty() {
            return Err(ClaimConflict::Taken(taken));
        }

        for seat in seats {
            self.occupants.insert(seat.clone(), Some(booking));
        }
        Ok(())
    }

    /// Frees the seats currently held by `booking` and returns them.
    pub(crate) fn release_held_by(&mut self, booking: BookingId) -> Vec<SeatId> {
        let mut freed = Vec::new();
        for (seat, holder) in self.occupants.iter_mut() {
            if *holder == Some(booking) {
                *holder = None;
                freed.push(seat.clone());
            }
        }
        freed
    }

    pub fn snapshot(&self, event_id: EventId) -> SeatSnapshot {
        SeatSnapshot {
            event_id,
            taken_at: Utc::now(),
            total_seats: self.len(),
            occupied: self.occupied(),
        }
    }
}

/// Point-in-time copy of which seats are occupied. Advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatSnapshot {
    pub event_id: EventId,
    pub taken_at: DateTime<Utc>,
    pub total_seats: usize,
    pub occupied: Vec<SeatId>,
}
