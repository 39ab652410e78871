use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use engine::{ExecutionContext, ExecutionOptions, RetryOptions};
use futures::stream::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::AppState;
use crate::handlers::workflows::load_definition;

#[derive(Deserialize)]
pub struct ExecuteWorkflowDto {
    pub input: Value,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub enable_parallel: Option<bool>,
}

impl ExecuteWorkflowDto {
    fn into_options(self, max_workers: usize) -> (Value, ExecutionOptions) {
        let opts = ExecutionOptions {
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            secrets: Default::default(),
            debug: self.debug,
            enable_parallel: self.enable_parallel,
            max_workers,
            execution_id: None,
        };
        (self.input, opts)
    }
}

/// `POST /workflows/:id/execute` — synchronous execution. Blocks until the
/// run reaches a terminal status.
pub async fn execute(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<ExecuteWorkflowDto>,
) -> Result<Json<ExecutionContext>, StatusCode> {
    let def = load_definition(&state, id).await?;
    let (input, opts) = payload.into_options(10);
    let context = state.driver.execute(&def, input, opts).await;
    Ok(Json(context))
}

/// `POST /workflows/:id/execute/stream` — the SSE-style progress protocol.
/// Always runs the serial path (streaming disables parallel batching).
pub async fn execute_stream(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<ExecuteWorkflowDto>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>>, StatusCode> {
    let def = Arc::new(load_definition(&state, id).await?);
    let (input, mut opts) = payload.into_options(10);
    opts.enable_parallel = Some(false);

    let driver = state.driver.clone();
    let stream = async_stream::stream! {
        let def = def;
        let lines = driver.execute_stream(&def, input, opts);
        futures::pin_mut!(lines);
        while let Some(line) = lines.next().await {
            yield Ok::<_, std::convert::Infallible>(Event::default().data(line));
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// `POST /workflows/:id/execute/background` — accepts the request and
/// enqueues it on the in-process [`queue::JobQueue`] for background
/// execution, returning immediately with the execution id the caller
/// should poll via `GET /executions/:id`.
pub async fn execute_background(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<ExecuteWorkflowDto>,
) -> Result<(StatusCode, Json<serde_json::Value>), StatusCode> {
    let def = load_definition(&state, id).await?;
    let (input, opts) = payload.into_options(10);

    let job = queue::Job::new(Arc::new(def), input, opts);
    let execution_id = state
        .queue
        .enqueue(job)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "execution_id": execution_id })),
    ))
}

/// `GET /executions/:id` — `get_status`.
pub async fn status(
    Path(execution_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ExecutionContext>, StatusCode> {
    match state.driver.get_status(execution_id).await {
        Some(ctx) => Ok(Json(ctx)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// `POST /executions/:id/stop` — `stop`.
pub async fn stop(
    Path(execution_id): Path<Uuid>,
    State(state): State<AppState>,
) -> StatusCode {
    if state.driver.stop(execution_id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Deserialize)]
pub struct RetryFromDto {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub user_id: String,
}

/// `POST /workflows/:workflow_id/retry-from/:node_id?base_execution=<uuid>`
/// — `retry_from`. The base execution is reloaded from the persisted
/// context column since a completed run is no longer held in the driver's
/// in-memory `live` map.
pub async fn retry_from(
    Path((workflow_id, node_id)): Path<(Uuid, String)>,
    axum::extract::Query(params): axum::extract::Query<std::collections::HashMap<String, String>>,
    State(state): State<AppState>,
    Json(payload): Json<RetryFromDto>,
) -> Result<Json<ExecutionContext>, StatusCode> {
    let def = load_definition(&state, workflow_id).await?;

    let base_execution_id: Uuid = params
        .get("base_execution")
        .and_then(|s| s.parse().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let row = db::repository::executions::get_execution(&state.pool, base_execution_id)
        .await
        .map_err(|e| match e {
            db::DbError::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        })?;

    let base: ExecutionContext = row
        .context
        .ok_or(StatusCode::CONFLICT)
        .and_then(|v| serde_json::from_value(v).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR))?;

    let opts = RetryOptions {
        tenant_id: payload.tenant_id,
        user_id: payload.user_id,
        secrets: Default::default(),
    };

    let context = state
        .driver
        .retry_from(&def, &base, &node_id, opts)
        .await
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    Ok(Json(context))
}
