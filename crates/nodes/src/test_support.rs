//! Shared fixtures for node unit tests — an `ExecutionContext` wired to
//! the [`crate::collaborators::stub`] implementations.

use crate::collaborators::{stub::*, Collaborators};
use crate::ExecutionContext;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Build a default test context backed entirely by stub collaborators.
pub fn test_ctx() -> ExecutionContext {
    ExecutionContext {
        workflow_id: Uuid::new_v4(),
        execution_id: Uuid::new_v4(),
        tenant_id: "t1".into(),
        user_id: "u1".into(),
        input: Value::Null,
        secrets: Default::default(),
        global_context: Value::Null,
        collaborators: Arc::new(Collaborators {
            identity: Arc::new(StubIdentityService::allowing()),
            embeddings: Arc::new(StubEmbeddingProvider { dim: 4 }),
            chat: Arc::new(StubChatProvider::returning("ok")),
            rerank: Arc::new(StubRerankProvider),
            vector_store: Arc::new(StubVectorStore::with_collection("c", vec![])),
            keyword_index: None,
            clock: Arc::new(SystemClock),
        }),
    }
}

/// Build a context with a specific set of collaborators, leaving the rest
/// at their stub defaults.
pub fn test_ctx_with(collaborators: Collaborators) -> ExecutionContext {
    ExecutionContext {
        collaborators: Arc::new(collaborators),
        ..test_ctx()
    }
}
