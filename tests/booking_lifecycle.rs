mod common;

use chrono::Duration;

use booking_engine::error::ReservationError;
use booking_engine::models::BookingStatus;
use booking_engine::services::notification::Notification;
use booking_engine::services::scheduler::Adjudication;
use booking_engine::services::webhook::WebhookAck;
use booking_engine::store::BookingStore;
use common::{confirmed, seats, Harness, StubGateway};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_requests_for_the_same_seat_grant_it_once() {
    let h = Harness::new();
    let event_id = h.event(&["A1"]).await;

    let (first, second) = tokio::join!(
        h.state.reservations.book(event_id, "alice", seats(&["A1"])),
        h.state.reservations.book(event_id, "bob", seats(&["A1"])),
    );

    let outcomes = [first, second];
    let granted = outcomes.iter().filter(|r| r.is_ok()).count();
    let refused = outcomes
        .iter()
        .filter(|r| matches!(r, Err(ReservationError::SeatsUnavailable { .. })))
        .count();
    assert_eq!((granted, refused), (1, 1));
    assert_eq!(h.gateway.sessions_created(), 1);
}

#[tokio::test]
async fn unpaid_hold_expires_after_the_window_and_frees_its_seats() {
    let h = Harness::new();
    let event_id = h.event(&["A1", "A2", "A3"]).await;
    let booking = h
        .state
        .reservations
        .try_reserve(event_id, "alice", seats(&["A1", "A2"]))
        .await
        .unwrap();
    assert_eq!(booking.expires_at - booking.created_at, Duration::minutes(10));

    let outcome = h
        .state
        .scheduler
        .adjudicate(booking.id, booking.created_at + Duration::minutes(10))
        .await
        .unwrap();

    assert!(matches!(outcome, Adjudication::Expired { ref released } if released.len() == 2));
    let stored = h.store.get_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Expired);
    assert!(h.occupied(event_id).await.is_empty());
}

#[tokio::test]
async fn payment_before_expiry_keeps_the_seat() {
    let h = Harness::new();
    let event_id = h.event(&["B1"]).await;
    let receipt = h.state.reservations.book(event_id, "alice", seats(&["B1"])).await.unwrap();

    let ack = h.state.webhooks.handle(&confirmed(&receipt.payment_reference)).await.unwrap();
    assert_eq!(ack, WebhookAck::Confirmed { booking_id: receipt.booking_id });

    let outcome = h
        .state
        .scheduler
        .adjudicate(receipt.booking_id, receipt.expires_at)
        .await
        .unwrap();
    assert_eq!(outcome, Adjudication::AlreadyPaid);

    let stored = h.store.get_booking(receipt.booking_id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Paid);
    assert_eq!(h.occupied(event_id).await, seats(&["B1"]));
}

#[tokio::test]
async fn duplicate_confirmation_transitions_and_notifies_once() {
    let h = Harness::new();
    let event_id = h.event(&["C1"]).await;
    let receipt = h.state.reservations.book(event_id, "alice", seats(&["C1"])).await.unwrap();
    let body = confirmed(&receipt.payment_reference);

    let first = h.state.webhooks.handle(&body).await.unwrap();
    let second = h.state.webhooks.handle(&body).await.unwrap();

    assert_eq!(first, WebhookAck::Confirmed { booking_id: receipt.booking_id });
    assert_eq!(second, WebhookAck::Duplicate { booking_id: receipt.booking_id });
    assert_eq!(
        h.dispatcher.recorded(),
        vec![Notification::BookingConfirmed { booking_id: receipt.booking_id }]
    );
    let stats = h.state.webhooks.stats();
    assert_eq!((stats.confirmations, stats.duplicates), (1, 1));
}

#[tokio::test]
async fn late_payment_after_reassignment_changes_nothing() {
    let h = Harness::new();
    let event_id = h.event(&["D1"]).await;
    let stale = h.state.reservations.book(event_id, "alice", seats(&["D1"])).await.unwrap();
    h.state
        .scheduler
        .adjudicate(stale.booking_id, stale.expires_at)
        .await
        .unwrap();
    let fresh = h.state.reservations.book(event_id, "bob", seats(&["D1"])).await.unwrap();
    let seat_map_before = h.store.load_event(event_id).await.unwrap().unwrap().seats;

    let ack = h.state.webhooks.handle(&confirmed(&stale.payment_reference)).await.unwrap();

    assert_eq!(ack, WebhookAck::LatePaymentFlagged { booking_id: stale.booking_id });
    assert_eq!(h.state.webhooks.stats().late_payments, 1);
    let stale_now = h.store.get_booking(stale.booking_id).await.unwrap().unwrap();
    let fresh_now = h.store.get_booking(fresh.booking_id).await.unwrap().unwrap();
    assert_eq!(stale_now.status, BookingStatus::Expired);
    assert_eq!(stale_now.paid_at, None);
    assert_eq!(fresh_now.status, BookingStatus::Pending);
    let seat_map_after = h.store.load_event(event_id).await.unwrap().unwrap().seats;
    assert_eq!(seat_map_after, seat_map_before);
    assert_eq!(seat_map_after.occupant("D1"), Some(fresh.booking_id));
    assert!(h.dispatcher.recorded().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn confirmation_racing_expiry_has_exactly_one_winner() {
    let h = Harness::new();
    let layout: Vec<String> = (1..=40).map(|n| format!("S{n}")).collect();
    let layout_refs: Vec<&str> = layout.iter().map(String::as_str).collect();
    let event_id = h.event(&layout_refs).await;

    for seat in &layout {
        let receipt = h
            .state
            .reservations
            .book(event_id, "racer", vec![seat.clone()])
            .await
            .unwrap();
        let body = confirmed(&receipt.payment_reference);

        let (paid, expired) = tokio::join!(
            h.state.webhooks.handle(&body),
            h.state.scheduler.adjudicate(receipt.booking_id, receipt.expires_at),
        );
        let paid = paid.unwrap();
        let expired = expired.unwrap();

        let booking = h.store.get_booking(receipt.booking_id).await.unwrap().unwrap();
        let held = h.store.load_event(event_id).await.unwrap().unwrap().seats.occupant(seat);
        match booking.status {
            BookingStatus::Paid => {
                assert!(matches!(paid, WebhookAck::Confirmed { .. }));
                assert_eq!(expired, Adjudication::AlreadyPaid);
                assert_eq!(held, Some(receipt.booking_id));
            }
            BookingStatus::Expired => {
                assert!(matches!(paid, WebhookAck::LatePaymentFlagged { .. }));
                assert!(matches!(expired, Adjudication::Expired { .. }));
                assert_eq!(held, None);
            }
            other => panic!("booking left in {other}"),
        }
    }

    let paid = h
        .store
        .bookings_for_requester("racer")
        .await
        .unwrap()
        .into_iter()
        .filter(|b| b.status == BookingStatus::Paid)
        .count();
    assert_eq!(h.dispatcher.confirmations(), paid);
}

#[tokio::test]
async fn gateway_outage_releases_the_hold_and_reports_it() {
    let h = Harness::with_gateway(StubGateway::failing());
    let event_id = h.event(&["E1"]).await;

    let err = h.state.reservations.book(event_id, "alice", seats(&["E1"])).await.unwrap_err();

    assert!(matches!(err, ReservationError::Gateway(_)));
    assert!(h.occupied(event_id).await.is_empty());
    // The seat can be booked again right away.
    assert!(h.state.reservations.try_reserve(event_id, "bob", seats(&["E1"])).await.is_ok());
}

#[tokio::test]
async fn restart_recovers_timers_and_sweep_expires_overdue_holds() {
    let h = Harness::new();
    let event_id = h.event(&["F1", "F2"]).await;
    let booking = h
        .state
        .reservations
        .try_reserve(event_id, "alice", seats(&["F1"]))
        .await
        .unwrap();
    h.state.scheduler.disarm(booking.id);

    // A fresh scheduler over the same store sees the durable fire-at time.
    let restarted = booking_engine::services::ExpiryScheduler::new(h.store.clone(), None);
    assert_eq!(restarted.recover().await.unwrap(), 1);
    assert_eq!(restarted.next_fire(), Some(booking.expires_at));

    let report = restarted.sweep_at(booking.expires_at).await.unwrap();
    assert_eq!((report.examined, report.expired), (1, 1));
    assert!(h.occupied(event_id).await.is_empty());
}
