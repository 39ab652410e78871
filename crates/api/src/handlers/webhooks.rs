use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use super::AppState;
use db::repository::workflows as wf_repo;
use engine::{ExecutionOptions, WorkflowDefinition};

/// `POST /webhook/:path` — finds the workflow whose `metadata.webhook_path`
/// matches and enqueues a background execution for it. Webhook routing is
/// metadata-driven rather than a dedicated `Trigger` type, since
/// `WorkflowDefinition.metadata` is the only place the core model carries
/// caller-declared extras (the `ui.inputs` panel lives there too).
pub async fn handle_webhook(
    Path(path): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let workflows = match wf_repo::list_workflows(&state.pool).await {
        Ok(wfs) => wfs,
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    let matched = workflows.into_iter().find_map(|row| {
        let def: WorkflowDefinition = serde_json::from_value(row.definition.clone()).ok()?;
        let webhook_path = def.metadata.get("webhook_path")?.as_str()?.to_string();
        (webhook_path == path).then_some(def)
    });

    let def = match matched {
        Some(d) => d,
        None => return Err(StatusCode::NOT_FOUND),
    };

    let job = queue::Job::new(
        Arc::new(def),
        payload,
        ExecutionOptions::default(),
    );

    let execution_id = state
        .queue
        .enqueue(job)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "message": "webhook accepted", "execution_id": execution_id })),
    ))
}
