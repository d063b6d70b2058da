//! Test doubles shared by the unit tests and the `tests/` suites.
//!
//! Enabled by the `test-utils` feature (on by default).

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::StoreError;
use crate::models::{EventId, NewEvent};
use crate::services::notification::{Notification, NotificationDispatcher};
use crate::services::payment::{
    sha256_hex, CheckoutRequest, CheckoutSession, GatewayError, PaymentGateway, PaymentNotification,
    PaymentStatus,
};
use crate::store::{BookingStore, MemoryStore};

const STUB_SECRET: &str = "stub-secret";

fn stub_token(payment_id: &str, status: PaymentStatus) -> String {
    sha256_hex(&format!("{}{}{}", payment_id, status.as_str(), STUB_SECRET))
}

/// Raw webhook body signed the way [`StubGateway`] verifies it.
pub fn signed_body(payment_id: &str, status: PaymentStatus) -> Vec<u8> {
    serde_json::to_vec(&PaymentNotification {
        payment_id: payment_id.to_string(),
        status,
        token: stub_token(payment_id, status),
    })
    .unwrap_or_default()
}

pub fn confirmed(payment_id: &str) -> Vec<u8> {
    signed_body(payment_id, PaymentStatus::Confirmed)
}

/// Gateway double: hands out `pay-<booking id>` references and signs
/// notifications with a fixed secret.
#[derive(Default)]
pub struct StubGateway {
    fail: bool,
    sessions: AtomicU32,
}

impl StubGateway {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sessions_created(&self) -> u32 {
        self.sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession, GatewayError> {
        if self.fail {
            return Err(GatewayError::Rejected {
                message: "stub gateway is down".to_string(),
            });
        }
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(CheckoutSession {
            payment_reference: format!("pay-{}", request.booking_id),
            redirect_url: Some(format!("https://pay.test/{}", request.booking_id)),
        })
    }

    fn verify_notification(&self, notification: &PaymentNotification) -> bool {
        constant_time_eq::constant_time_eq(
            notification.token.as_bytes(),
            stub_token(&notification.payment_id, notification.status).as_bytes(),
        )
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    notices: Mutex<Vec<Notification>>,
}

impl RecordingDispatcher {
    pub fn recorded(&self) -> Vec<Notification> {
        self.notices.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn confirmations(&self) -> usize {
        self.recorded()
            .iter()
            .filter(|n| matches!(n, Notification::BookingConfirmed { .. }))
            .count()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn dispatch(&self, notification: Notification) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}

/// Event with the given layout at 2500 per seat, starting in a week.
pub fn sample_event(layout: &[&str]) -> NewEvent {
    NewEvent {
        title: "Hamlet".to_string(),
        item_ref: "hamlet".to_string(),
        starts_at: Utc::now() + Duration::days(7),
        unit_price: 2_500,
        seat_layout: layout.iter().map(|s| s.to_string()).collect(),
    }
}

/// Memory store with one [`sample_event`].
pub async fn seeded_store(layout: &[&str]) -> Result<(Arc<MemoryStore>, EventId), StoreError> {
    let store = Arc::new(MemoryStore::new());
    let event = store.insert_event(sample_event(layout)).await?;
    Ok((store, event.id))
}
