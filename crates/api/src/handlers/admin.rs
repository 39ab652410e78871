//! `/admin/*` — operator endpoints for clearing retry/error-history state
//! and resetting circuit breakers, one handler per admin operation.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;

pub async fn clear_error_history(State(state): State<AppState>) -> StatusCode {
    state.driver.clear_error_history();
    StatusCode::NO_CONTENT
}

pub async fn reset_circuit_breakers(State(state): State<AppState>) -> StatusCode {
    state.driver.reset_circuit_breakers();
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
pub struct ExecutionIdDto {
    pub execution_id: Uuid,
}

pub async fn clear_retry_counts(
    State(state): State<AppState>,
    Json(payload): Json<ExecutionIdDto>,
) -> StatusCode {
    state.driver.clear_retry_counts(payload.execution_id);
    StatusCode::NO_CONTENT
}

#[derive(Deserialize, Default)]
pub struct ClearCacheDto {
    pub execution_id: Option<Uuid>,
}

pub async fn clear_cache(
    State(state): State<AppState>,
    Json(payload): Json<ClearCacheDto>,
) -> StatusCode {
    state.driver.clear_cache(payload.execution_id).await;
    StatusCode::NO_CONTENT
}
