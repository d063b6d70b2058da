use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use super::{reservation_error, store_error, to_api_error, validation_error, ApiResult};
use crate::models::{BookingId, EventId, SeatId};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking).get(list_bookings))
        .route("/bookings/{id}", get(get_booking))
}

// POST /api/bookings
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub event_id: EventId,
    #[validate(length(min = 1, max = 128, message = "requesterId обязателен"))]
    pub requester_id: String,
    #[validate(length(min = 1, message = "нужно выбрать хотя бы одно место"))]
    pub seat_ids: Vec<SeatId>,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBookingRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate().map_err(validation_error)?;

    let receipt = state
        .reservations
        .book(req.event_id, &req.requester_id, req.seat_ids)
        .await
        .map_err(reservation_error)?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

// GET /api/bookings?requester_id=...
#[derive(Debug, Deserialize)]
pub struct ListBookingsQuery {
    pub requester_id: String,
}

async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListBookingsQuery>,
) -> ApiResult<impl IntoResponse> {
    if query.requester_id.trim().is_empty() {
        return Err(to_api_error(StatusCode::BAD_REQUEST, "requester_id обязателен"));
    }

    let bookings = state
        .reservations
        .bookings_for_requester(query.requester_id.trim())
        .await
        .map_err(|e| store_error(&e))?;
    Ok(Json(bookings))
}

// GET /api/bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<BookingId>,
) -> ApiResult<impl IntoResponse> {
    let booking = state
        .reservations
        .get_booking(id)
        .await
        .map_err(|e| store_error(&e))?
        .ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Бронирование не найдено"))?;
    Ok(Json(booking))
}
