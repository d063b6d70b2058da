use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::error::CatalogError;
use crate::models::{Event, NewEvent, SeatId};
use crate::services::notification::{Notification, NotificationDispatcher};
use crate::store::BookingStore;

/// A show scheduled at one or more start times. Each start time becomes its
/// own event with its own seat map.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewShow {
    pub title: String,
    pub item_ref: String,
    pub unit_price: i64,
    pub seat_layout: Vec<SeatId>,
    pub start_times: Vec<DateTime<Utc>>,
}

pub struct EventCatalog {
    store: Arc<dyn BookingStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl EventCatalog {
    pub fn new(store: Arc<dyn BookingStore>, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub async fn create_events(&self, show: NewShow) -> Result<Vec<Event>, CatalogError> {
        if show.start_times.is_empty() {
            return Err(CatalogError::Invalid("at least one start time is required".to_string()));
        }

        let mut created = Vec::with_capacity(show.start_times.len());
        for starts_at in &show.start_times {
            let event = self
                .create_event(NewEvent {
                    title: show.title.clone(),
                    item_ref: show.item_ref.clone(),
                    starts_at: *starts_at,
                    unit_price: show.unit_price,
                    seat_layout: show.seat_layout.clone(),
                })
                .await?;
            created.push(event);
        }
        Ok(created)
    }

    /// Persists one event and announces it with `show.created` once it can be
    /// read back from the store.
    pub async fn create_event(&self, event: NewEvent) -> Result<Event, CatalogError> {
        let event = validate(event)?;
        let inserted = self.store.insert_event(event).await?;

        let stored = self
            .store
            .load_event(inserted.id)
            .await?
            .ok_or_else(|| CatalogError::NotReady(inserted.id.to_string()))?;

        info!(
            event_id = %stored.id,
            title = %stored.title,
            seats = stored.seats.len(),
            "🎭 Event created for {}",
            stored.starts_at
        );
        self.dispatcher.dispatch(Notification::ShowCreated { event_id: stored.id });
        Ok(stored)
    }
}

fn validate(mut event: NewEvent) -> Result<NewEvent, CatalogError> {
    event.title = event.title.trim().to_string();
    if event.title.is_empty() {
        return Err(CatalogError::Invalid("title must not be blank".to_string()));
    }
    if event.unit_price < 0 {
        return Err(CatalogError::Invalid("unit price must not be negative".to_string()));
    }
    if event.seat_layout.is_empty() {
        return Err(CatalogError::Invalid("seat layout must not be empty".to_string()));
    }

    let mut seen = HashSet::with_capacity(event.seat_layout.len());
    for seat in event.seat_layout.iter_mut() {
        *seat = seat.trim().to_string();
        if seat.is_empty() {
            return Err(CatalogError::Invalid("seat id must not be blank".to_string()));
        }
        if !seen.insert(seat.clone()) {
            return Err(CatalogError::Invalid(format!("duplicate seat {seat} in layout")));
        }
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::RecordingDispatcher;
    use chrono::Duration;

    fn show(start_times: Vec<DateTime<Utc>>) -> NewShow {
        NewShow {
            title: " Hamlet ".to_string(),
            item_ref: "hamlet".to_string(),
            unit_price: 2_500,
            seat_layout: vec!["A1".to_string(), "A2".to_string()],
            start_times,
        }
    }

    #[tokio::test]
    async fn one_event_and_one_notice_per_start_time() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let catalog = EventCatalog::new(store.clone(), dispatcher.clone());
        let now = Utc::now();

        let events = catalog
            .create_events(show(vec![now + Duration::days(1), now + Duration::days(2)]))
            .await
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].title, "Hamlet");
        assert_ne!(events[0].id, events[1].id);
        let expected: Vec<_> = events
            .iter()
            .map(|e| Notification::ShowCreated { event_id: e.id })
            .collect();
        assert_eq!(dispatcher.recorded(), expected);
        assert!(store.load_event(events[1].id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn invalid_layouts_are_rejected_without_notice() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let catalog = EventCatalog::new(store, dispatcher.clone());

        let mut duplicate = show(vec![Utc::now()]);
        duplicate.seat_layout.push("A1 ".to_string());
        assert!(matches!(catalog.create_events(duplicate).await, Err(CatalogError::Invalid(_))));
        assert!(matches!(catalog.create_events(show(vec![])).await, Err(CatalogError::Invalid(_))));
        assert!(dispatcher.recorded().is_empty());
    }
}
