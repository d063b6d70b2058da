use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventId, SeatId, SeatMap};

/// One scheduled showing. Its seat map is only mutated through the store's
/// reserve/release/expire operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub item_ref: String,
    pub starts_at: DateTime<Utc>,
    /// Price of one seat in minor currency units.
    pub unit_price: i64,
    pub seats: SeatMap,
}

impl Event {
    pub fn price_for(&self, seat_count: usize) -> i64 {
        self.unit_price.saturating_mul(seat_count as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub title: String,
    pub item_ref: String,
    pub starts_at: DateTime<Utc>,
    pub unit_price: i64,
    pub seat_layout: Vec<SeatId>,
}

impl NewEvent {
    pub fn into_event(self, id: EventId) -> Event {
        Event {
            id,
            title: self.title,
            item_ref: self.item_ref,
            starts_at: self.starts_at,
            unit_price: self.unit_price,
            seats: SeatMap::with_layout(self.seat_layout),
        }
    }
}
