pub mod bookings;
pub mod events;
pub mod maintenance;
pub mod payment;

use axum::{http::StatusCode, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{CatalogError, ReservationError, StoreError, WebhookError};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(bookings::routes())
        .merge(events::routes())
        .merge(payment::routes())
        .merge(maintenance::routes())
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    success: bool,
    message: String,
}

pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub fn to_api_error(status: StatusCode, message: &str) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError { success: false, message: message.to_string() }))
}

fn validation_error(errors: validator::ValidationErrors) -> (StatusCode, Json<ApiError>) {
    to_api_error(StatusCode::BAD_REQUEST, &errors.to_string())
}

fn store_error(e: &StoreError) -> (StatusCode, Json<ApiError>) {
    tracing::error!("Ошибка хранилища: {}", e);
    to_api_error(StatusCode::SERVICE_UNAVAILABLE, "Хранилище временно недоступно, повторите запрос")
}

pub(crate) fn reservation_error(e: ReservationError) -> (StatusCode, Json<ApiError>) {
    let status = match &e {
        ReservationError::SeatsUnavailable { .. } => StatusCode::CONFLICT,
        ReservationError::EventNotFound => StatusCode::NOT_FOUND,
        ReservationError::TooManySeats { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ReservationError::InvalidSeats(_) | ReservationError::MissingRequester => StatusCode::BAD_REQUEST,
        ReservationError::Gateway(_) => StatusCode::BAD_GATEWAY,
        ReservationError::Store(store) => return store_error(store),
    };
    to_api_error(status, &e.to_string())
}

pub(crate) fn webhook_error(e: WebhookError) -> (StatusCode, Json<ApiError>) {
    let status = match &e {
        WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
        WebhookError::Malformed(_) => StatusCode::BAD_REQUEST,
        WebhookError::UnknownPaymentReference(_) => StatusCode::NOT_FOUND,
        WebhookError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
        WebhookError::Store(store) => return store_error(store),
    };
    to_api_error(status, &e.to_string())
}

pub(crate) fn catalog_error(e: CatalogError) -> (StatusCode, Json<ApiError>) {
    let status = match &e {
        CatalogError::Invalid(_) => StatusCode::BAD_REQUEST,
        CatalogError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
        CatalogError::Store(store) => return store_error(store),
    };
    to_api_error(status, &e.to_string())
}
