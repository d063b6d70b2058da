#![allow(dead_code)]

use std::sync::Arc;

use booking_engine::config::Config;
use booking_engine::models::EventId;
use booking_engine::store::{BookingStore, MemoryStore};
use booking_engine::AppState;

pub use booking_engine::test_support::{
    confirmed, sample_event, signed_body, RecordingDispatcher, StubGateway,
};

/// Application state over a memory store, with handles on every double.
pub struct Harness {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<StubGateway>,
    pub dispatcher: Arc<RecordingDispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_gateway(StubGateway::default())
    }

    pub fn with_gateway(gateway: StubGateway) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(gateway);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let state = AppState::build(
            Config::for_memory_store(),
            store.clone(),
            gateway.clone(),
            dispatcher.clone(),
            None,
        );
        Self {
            state,
            store,
            gateway,
            dispatcher,
        }
    }

    /// Creates an event with the given layout at 2500 per seat.
    pub async fn event(&self, layout: &[&str]) -> EventId {
        self.store.insert_event(sample_event(layout)).await.unwrap().id
    }

    pub async fn occupied(&self, event_id: EventId) -> Vec<String> {
        self.store.seat_snapshot(event_id).await.unwrap().unwrap().occupied
    }
}

pub fn seats(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}
