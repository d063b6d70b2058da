use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use super::{store_error, ApiResult};
use crate::services::scheduler::SchedulerStats;
use crate::services::webhook::WebhookStats;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/maintenance/sweep", post(run_sweep))
        .route("/maintenance/stats", get(stats))
}

// POST /api/maintenance/sweep - ручной запуск страховочной проверки
async fn run_sweep(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let report = state.scheduler.sweep().await.map_err(|e| store_error(&e))?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MaintenanceStats {
    scheduler: SchedulerStats,
    webhooks: WebhookStats,
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(MaintenanceStats {
        scheduler: state.scheduler.stats(),
        webhooks: state.webhooks.stats(),
    })
}
