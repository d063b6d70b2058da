use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use super::{catalog_error, store_error, to_api_error, validation_error, ApiResult};
use crate::models::{EventId, SeatId};
use crate::services::catalog::NewShow;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", post(create_events))
        .route("/events/{id}", get(get_event))
        .route("/events/{id}/seats", get(get_seats))
}

// POST /api/events
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventsRequest {
    #[validate(length(min = 1, max = 256))]
    pub title: String,
    #[serde(default)]
    pub item_ref: String,
    #[validate(range(min = 0))]
    pub unit_price: i64,
    #[validate(length(min = 1))]
    pub seat_layout: Vec<SeatId>,
    #[validate(length(min = 1))]
    pub start_times: Vec<DateTime<Utc>>,
}

async fn create_events(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateEventsRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate().map_err(validation_error)?;

    let events = state
        .catalog
        .create_events(NewShow {
            title: req.title,
            item_ref: req.item_ref,
            unit_price: req.unit_price,
            seat_layout: req.seat_layout,
            start_times: req.start_times,
        })
        .await
        .map_err(catalog_error)?;

    Ok((StatusCode::CREATED, Json(events)))
}

// GET /api/events/{id}
async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EventId>,
) -> ApiResult<impl IntoResponse> {
    let event = state
        .reservations
        .load_event(id)
        .await
        .map_err(|e| store_error(&e))?
        .ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Событие не найдено"))?;
    Ok(Json(event))
}

// GET /api/events/{id}/seats - снимок занятых мест, без гарантий
async fn get_seats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EventId>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = state
        .reservations
        .seat_snapshot(id)
        .await
        .map_err(|e| store_error(&e))?
        .ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Событие не найдено"))?;
    Ok(Json(snapshot))
}
