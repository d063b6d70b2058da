mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use booking_engine::app;
use common::{confirmed, Harness};

async fn call(router: &Router, method: Method, uri: &str, body: Option<Vec<u8>>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(Body::from).unwrap_or_else(Body::empty))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn json_body(value: Value) -> Option<Vec<u8>> {
    Some(serde_json::to_vec(&value).unwrap())
}

async fn create_event(router: &Router) -> String {
    let (status, events) = call(
        router,
        Method::POST,
        "/api/events",
        json_body(json!({
            "title": "Hamlet",
            "itemRef": "hamlet",
            "unitPrice": 2500,
            "seatLayout": ["A1", "A2", "A3", "A4", "A5", "A6"],
            "startTimes": ["2030-01-01T19:00:00Z"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    events[0]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_endpoints_respond() {
    let h = Harness::new();
    let router = app(h.state.clone());

    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn booking_flow_over_http() {
    let h = Harness::new();
    let router = app(h.state.clone());
    let event_id = create_event(&router).await;
    assert_eq!(h.dispatcher.recorded().len(), 1);

    let (status, receipt) = call(
        &router,
        Method::POST,
        "/api/bookings",
        json_body(json!({ "eventId": event_id, "requesterId": "alice", "seatIds": ["A1", "A2"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["amount"], 5000);
    assert_eq!(receipt["currency"], "KZT");
    let booking_id = receipt["bookingId"].as_str().unwrap().to_string();
    let reference = receipt["paymentReference"].as_str().unwrap().to_string();

    let (status, err) = call(
        &router,
        Method::POST,
        "/api/bookings",
        json_body(json!({ "eventId": event_id, "requesterId": "bob", "seatIds": ["A2", "A3"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["success"], false);

    let (status, snapshot) = call(&router, Method::GET, &format!("/api/events/{event_id}/seats"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["occupied"], json!(["A1", "A2"]));

    let (status, ack) = call(&router, Method::POST, "/api/webhook/payment", Some(confirmed(&reference))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["outcome"], "confirmed");

    let (status, booking) = call(&router, Method::GET, &format!("/api/bookings/{booking_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(booking["status"], "paid");

    let (status, list) = call(&router, Method::GET, "/api/bookings?requester_id=alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn request_errors_map_to_status_codes() {
    let h = Harness::new();
    let router = app(h.state.clone());
    let event_id = create_event(&router).await;

    let (status, _) = call(
        &router,
        Method::POST,
        "/api/bookings",
        json_body(json!({ "eventId": event_id, "requesterId": "alice", "seatIds": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &router,
        Method::POST,
        "/api/bookings",
        json_body(json!({
            "eventId": event_id,
            "requesterId": "alice",
            "seatIds": ["A1", "A2", "A3", "A4", "A5", "A6"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(
        &router,
        Method::POST,
        "/api/bookings",
        json_body(json!({
            "eventId": "00000000-0000-0000-0000-000000000000",
            "requesterId": "alice",
            "seatIds": ["A1"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let forged = serde_json::to_vec(&json!({ "paymentId": "pay-1", "status": "CONFIRMED", "token": "nope" })).unwrap();
    let (status, _) = call(&router, Method::POST, "/api/webhook/payment", Some(forged)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&router, Method::POST, "/api/webhook/payment", Some(confirmed("pay-unknown"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn maintenance_endpoints_report_sweeps() {
    let h = Harness::new();
    let router = app(h.state.clone());

    let (status, report) = call(&router, Method::POST, "/api/maintenance/sweep", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["examined"], 0);

    let (status, stats) = call(&router, Method::GET, "/api/maintenance/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["scheduler"]["sweepsRun"], 1);
    assert_eq!(stats["webhooks"]["latePayments"], 0);
}
