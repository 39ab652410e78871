//! The `ExecutionPersistence` collaborator, backed by the opaque `db`
//! store. Per DESIGN.md's resolution of the persistence-failure question,
//! a failure here is only logged — it never flips the execution's
//! in-memory status.

use std::sync::Arc;

use async_trait::async_trait;
use engine::{ExecutionContext, ExecutionPersistence};

use db::DbPool;

pub struct DbPersistence {
    pool: DbPool,
}

impl DbPersistence {
    pub fn new(pool: DbPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl ExecutionPersistence for DbPersistence {
    async fn save_execution(
        &self,
        context: &ExecutionContext,
        tenant_id: &str,
        executor_id: &str,
        _debug: bool,
        _enable_parallel: bool,
    ) {
        let status = context.status.to_string();
        let serialized = match serde_json::to_value(context) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(execution_id = %context.execution_id, error = %err, "failed to serialize execution context");
                return;
            }
        };

        if let Err(err) = db::repository::executions::save_execution_context(
            &self.pool,
            context.execution_id,
            &status,
            serialized,
        )
        .await
        {
            tracing::warn!(
                execution_id = %context.execution_id,
                tenant_id,
                user_id = executor_id,
                error = %err,
                "failed to persist execution (swallowed by design)"
            );
        }
    }
}
