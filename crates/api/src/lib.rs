//! `api` crate — HTTP/SSE collaborator surface.
//!
//! Translates the in-process `engine::Driver` API to the wire protocol.
//! Tenant/user identity and RBAC are out of scope — this crate accepts
//! `tenant_id`/`user_id` directly in request bodies rather than extracting
//! them from an auth layer that doesn't exist here.
//!
//! Exposes:
//!   GET    /api/v1/workflows
//!   POST   /api/v1/workflows
//!   GET    /api/v1/workflows/:id
//!   DELETE /api/v1/workflows/:id
//!   POST   /api/v1/workflows/:id/execute
//!   POST   /api/v1/workflows/:id/execute/stream
//!   POST   /api/v1/workflows/:id/execute/background
//!   POST   /api/v1/workflows/:id/retry-from/:node_id
//!   GET    /api/v1/executions/:id
//!   POST   /api/v1/executions/:id/stop
//!   POST   /api/v1/admin/clear-error-history
//!   POST   /api/v1/admin/reset-circuit-breakers
//!   POST   /api/v1/admin/clear-retry-counts
//!   POST   /api/v1/admin/clear-cache
//!   POST   /webhook/:path

pub mod handlers;
pub mod persistence;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use db::DbPool;
use engine::Driver;
use queue::JobQueue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub driver: Arc<Driver>,
    pub queue: Arc<JobQueue>,
}

pub async fn serve(bind: &str, state: AppState) -> Result<(), std::io::Error> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_router = Router::new()
        .route("/workflows", get(handlers::workflows::list).post(handlers::workflows::create))
        .route(
            "/workflows/:id",
            get(handlers::workflows::get).delete(handlers::workflows::delete),
        )
        .route("/workflows/:id/execute", post(handlers::executions::execute))
        .route(
            "/workflows/:id/execute/stream",
            post(handlers::executions::execute_stream),
        )
        .route(
            "/workflows/:id/execute/background",
            post(handlers::executions::execute_background),
        )
        .route(
            "/workflows/:workflow_id/retry-from/:node_id",
            post(handlers::executions::retry_from),
        )
        .route("/executions/:id", get(handlers::executions::status))
        .route("/executions/:id/stop", post(handlers::executions::stop))
        .route("/admin/clear-error-history", post(handlers::admin::clear_error_history))
        .route(
            "/admin/reset-circuit-breakers",
            post(handlers::admin::reset_circuit_breakers),
        )
        .route("/admin/clear-retry-counts", post(handlers::admin::clear_retry_counts))
        .route("/admin/clear-cache", post(handlers::admin::clear_cache));

    let app = Router::new()
        .nest("/api/v1", api_router)
        .route("/webhook/:path", post(handlers::webhooks::handle_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await
}
