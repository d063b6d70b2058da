use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::WebhookError;
use crate::ledger::ConfirmOutcome;
use crate::models::{Booking, BookingId, BookingStatus};
use crate::services::notification::{Notification, NotificationDispatcher};
use crate::services::payment::{PaymentGateway, PaymentNotification, PaymentStatus};
use crate::store::BookingStore;

/// How a delivery was acknowledged. Every variant maps to a success response,
/// so the gateway stops redelivering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookAck {
    Confirmed { booking_id: BookingId },
    Duplicate { booking_id: BookingId },
    /// Payment arrived after the hold expired. Nothing was changed; the
    /// booking needs manual reconciliation.
    LatePaymentFlagged { booking_id: BookingId },
    Ignored { status: PaymentStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookStats {
    pub confirmations: u64,
    pub duplicates: u64,
    pub late_payments: u64,
}

/// Applies gateway confirmations to the ledger, at-least-once safe.
pub struct PaymentWebhookProcessor {
    store: Arc<dyn BookingStore>,
    gateway: Arc<dyn PaymentGateway>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    confirmations: AtomicU64,
    duplicates: AtomicU64,
    late_payments: AtomicU64,
}

impl PaymentWebhookProcessor {
    pub fn new(
        store: Arc<dyn BookingStore>,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            gateway,
            dispatcher,
            confirmations: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            late_payments: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> WebhookStats {
        WebhookStats {
            confirmations: self.confirmations.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            late_payments: self.late_payments.load(Ordering::Relaxed),
        }
    }

    /// Parses, authenticates and applies one raw delivery.
    /// Nothing is mutated unless the signature checks out.
    pub async fn handle(&self, body: &[u8]) -> Result<WebhookAck, WebhookError> {
        let notification: PaymentNotification =
            serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;

        if !self.gateway.verify_notification(&notification) {
            warn!(
                payment_reference = %notification.payment_id,
                "Rejected payment notification with invalid token"
            );
            return Err(WebhookError::InvalidSignature);
        }

        match notification.status {
            PaymentStatus::Confirmed => self.apply_confirmation(&notification.payment_id).await,
            status => {
                info!(
                    payment_reference = %notification.payment_id,
                    status = status.as_str(),
                    "Payment notification acknowledged without state change"
                );
                Ok(WebhookAck::Ignored { status })
            }
        }
    }

    /// Resolves the payment reference and applies `pending -> paid`.
    pub async fn apply_confirmation(&self, payment_reference: &str) -> Result<WebhookAck, WebhookError> {
        let booking = self
            .store
            .find_by_payment_reference(payment_reference)
            .await?
            .ok_or_else(|| WebhookError::UnknownPaymentReference(payment_reference.to_string()))?;

        match self.store.confirm(booking.id, Utc::now()).await? {
            ConfirmOutcome::Confirmed(booking) => {
                self.confirmations.fetch_add(1, Ordering::Relaxed);
                info!(
                    booking_id = %booking.id,
                    %payment_reference,
                    "✅ Booking paid"
                );
                self.notify_confirmed(&booking).await?;
                Ok(WebhookAck::Confirmed { booking_id: booking.id })
            }
            ConfirmOutcome::AlreadyPaid(booking) => {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!(booking_id = %booking.id, %payment_reference, "Duplicate confirmation");
                // An earlier delivery may have failed the readiness guard.
                self.notify_confirmed(&booking).await?;
                Ok(WebhookAck::Duplicate { booking_id: booking.id })
            }
            ConfirmOutcome::Late(booking) => {
                self.late_payments.fetch_add(1, Ordering::Relaxed);
                error!(
                    target: "reconciliation",
                    booking_id = %booking.id,
                    %payment_reference,
                    status = %booking.status,
                    "Late payment for a booking that is no longer pending; manual reconciliation required"
                );
                Ok(WebhookAck::LatePaymentFlagged { booking_id: booking.id })
            }
            ConfirmOutcome::NotFound => Err(WebhookError::UnknownPaymentReference(payment_reference.to_string())),
        }
    }

    /// Fires `booking.confirmed` once per booking, after checking by direct
    /// lookup that the booking, its event and its requester are all present.
    async fn notify_confirmed(&self, booking: &Booking) -> Result<bool, WebhookError> {
        let current = self
            .store
            .get_booking(booking.id)
            .await?
            .filter(|b| b.status == BookingStatus::Paid)
            .ok_or_else(|| WebhookError::NotReady(format!("booking {} is not visible as paid", booking.id)))?;
        if current.requester_id.trim().is_empty() {
            return Err(WebhookError::NotReady(format!("booking {} has no requester", current.id)));
        }
        if self.store.load_event(current.event_id).await?.is_none() {
            return Err(WebhookError::NotReady(format!(
                "event {} of booking {} is missing",
                current.event_id, current.id
            )));
        }

        if !self.store.claim_confirmation_notice(current.id, Utc::now()).await? {
            return Ok(false);
        }
        self.dispatcher.dispatch(Notification::BookingConfirmed { booking_id: current.id });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewHold;
    use crate::error::{ReleaseError, ReservationError, StoreError};
    use crate::ledger::{ExpireOutcome, ReleaseOutcome};
    use crate::models::{Event, EventId, NewEvent, SeatSnapshot};
    use crate::store::MemoryStore;
    use crate::test_support::{confirmed, seeded_store, signed_body, RecordingDispatcher, StubGateway};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use std::sync::atomic::AtomicU32;

    /// Memory store whose first `load_event` calls miss, like a replica that
    /// has not caught up with the event yet.
    struct LaggingEventStore {
        inner: Arc<MemoryStore>,
        misses: AtomicU32,
    }

    #[async_trait]
    impl BookingStore for LaggingEventStore {
        async fn insert_event(&self, event: NewEvent) -> Result<Event, StoreError> {
            self.inner.insert_event(event).await
        }

        async fn load_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
            let lagging = self
                .misses
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lagging {
                return Ok(None);
            }
            self.inner.load_event(id).await
        }

        async fn seat_snapshot(&self, id: EventId) -> Result<Option<SeatSnapshot>, StoreError> {
            self.inner.seat_snapshot(id).await
        }

        async fn reserve(&self, hold: NewHold) -> Result<Booking, ReservationError> {
            self.inner.reserve(hold).await
        }

        async fn release(&self, id: BookingId) -> Result<ReleaseOutcome, ReleaseError> {
            self.inner.release(id).await
        }

        async fn confirm(&self, id: BookingId, at: DateTime<Utc>) -> Result<ConfirmOutcome, StoreError> {
            self.inner.confirm(id, at).await
        }

        async fn expire(&self, id: BookingId, at: DateTime<Utc>) -> Result<ExpireOutcome, StoreError> {
            self.inner.expire(id, at).await
        }

        async fn attach_payment_reference(&self, id: BookingId, reference: &str) -> Result<bool, StoreError> {
            self.inner.attach_payment_reference(id, reference).await
        }

        async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Booking>, StoreError> {
            self.inner.find_by_payment_reference(reference).await
        }

        async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
            self.inner.get_booking(id).await
        }

        async fn bookings_for_requester(&self, requester_id: &str) -> Result<Vec<Booking>, StoreError> {
            self.inner.bookings_for_requester(requester_id).await
        }

        async fn pending_bookings(&self) -> Result<Vec<Booking>, StoreError> {
            self.inner.pending_bookings().await
        }

        async fn stale_pending(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>, StoreError> {
            self.inner.stale_pending(now).await
        }

        async fn claim_confirmation_notice(&self, id: BookingId, at: DateTime<Utc>) -> Result<bool, StoreError> {
            self.inner.claim_confirmation_notice(id, at).await
        }
    }

    async fn pending_with_reference(store: &dyn BookingStore, event_id: EventId, reference: &str) -> BookingId {
        let now = Utc::now();
        let booking = store
            .reserve(NewHold {
                booking_id: BookingId::new(),
                event_id,
                requester_id: "user-1".to_string(),
                seats: vec!["A1".to_string()],
                created_at: now,
                expires_at: now + Duration::minutes(10),
            })
            .await
            .unwrap();
        store.attach_payment_reference(booking.id, reference).await.unwrap();
        booking.id
    }

    fn processor(store: Arc<dyn BookingStore>) -> (PaymentWebhookProcessor, Arc<StubGateway>, Arc<RecordingDispatcher>) {
        let gateway = Arc::new(StubGateway::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let processor = PaymentWebhookProcessor::new(store, gateway.clone(), dispatcher.clone());
        (processor, gateway, dispatcher)
    }

    #[tokio::test]
    async fn bad_signature_changes_nothing() {
        let (store, event_id) = seeded_store(&["A1"]).await.unwrap();
        let id = pending_with_reference(store.as_ref(), event_id, "pay-1").await;
        let (processor, _, dispatcher) = processor(store.clone());

        let body = br#"{"paymentId":"pay-1","status":"CONFIRMED","token":"forged"}"#;
        assert!(matches!(processor.handle(body).await, Err(WebhookError::InvalidSignature)));
        assert!(matches!(processor.handle(b"not json").await, Err(WebhookError::Malformed(_))));

        assert_eq!(store.get_booking(id).await.unwrap().unwrap().status, BookingStatus::Pending);
        assert!(dispatcher.recorded().is_empty());
    }

    #[tokio::test]
    async fn non_confirmed_statuses_are_acknowledged_only() {
        let (store, event_id) = seeded_store(&["A1"]).await.unwrap();
        let id = pending_with_reference(store.as_ref(), event_id, "pay-1").await;
        let (processor, _, _) = processor(store.clone());

        let ack = processor.handle(&signed_body("pay-1", PaymentStatus::Cancelled)).await.unwrap();
        assert_eq!(ack, WebhookAck::Ignored { status: PaymentStatus::Cancelled });
        assert_eq!(store.get_booking(id).await.unwrap().unwrap().status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_reference_is_reported() {
        let (store, _) = seeded_store(&["A1"]).await.unwrap();
        let (processor, _, _) = processor(store);

        let result = processor.handle(&signed_body("pay-404", PaymentStatus::Confirmed)).await;
        assert!(matches!(result, Err(WebhookError::UnknownPaymentReference(ref r)) if r == "pay-404"));
    }

    #[tokio::test]
    async fn late_confirmation_is_flagged_and_counted() {
        let (store, event_id) = seeded_store(&["A1"]).await.unwrap();
        let id = pending_with_reference(store.as_ref(), event_id, "pay-1").await;
        store.expire(id, Utc::now()).await.unwrap();
        let (processor, _, dispatcher) = processor(store.clone());

        let ack = processor.apply_confirmation("pay-1").await.unwrap();
        assert_eq!(ack, WebhookAck::LatePaymentFlagged { booking_id: id });
        assert_eq!(processor.stats().late_payments, 1);
        assert_eq!(store.get_booking(id).await.unwrap().unwrap().status, BookingStatus::Expired);
        assert!(dispatcher.recorded().is_empty());
    }

    #[tokio::test]
    async fn redelivery_after_failed_readiness_guard_notifies_once() {
        let (inner, event_id) = seeded_store(&["A1"]).await.unwrap();
        let id = pending_with_reference(inner.as_ref(), event_id, "pay-1").await;
        let store = Arc::new(LaggingEventStore {
            inner: inner.clone(),
            misses: AtomicU32::new(1),
        });
        let (processor, _, dispatcher) = processor(store);

        let first = processor.handle(&confirmed("pay-1")).await;
        assert!(matches!(first, Err(WebhookError::NotReady(_))));
        // Оплата уже применена, уведомление ещё нет
        assert_eq!(inner.get_booking(id).await.unwrap().unwrap().status, BookingStatus::Paid);
        assert!(dispatcher.recorded().is_empty());

        let second = processor.handle(&confirmed("pay-1")).await.unwrap();
        assert_eq!(second, WebhookAck::Duplicate { booking_id: id });
        let third = processor.handle(&confirmed("pay-1")).await.unwrap();
        assert_eq!(third, WebhookAck::Duplicate { booking_id: id });

        assert_eq!(dispatcher.recorded(), vec![Notification::BookingConfirmed { booking_id: id }]);
        let stats = processor.stats();
        assert_eq!((stats.confirmations, stats.duplicates), (1, 2));
    }
}
