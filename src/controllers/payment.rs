use axum::{
    body::Bytes,
    extract::State,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use std::sync::Arc;

use super::{webhook_error, ApiResult};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/payment", post(payment_webhook))
}

/// POST /api/webhook/payment
///
/// Тело читается как есть: подпись проверяется до любого изменения состояния.
/// Повторные доставки и поздние оплаты подтверждаются 200, чтобы шлюз не
/// повторял их бесконечно.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let ack = state.webhooks.handle(&body).await.map_err(webhook_error)?;
    Ok(Json(ack))
}
