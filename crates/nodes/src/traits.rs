//! The `ExecutableNode` trait — the contract every node must fulfil.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::collaborators::Collaborators;
use crate::NodeError;

/// Shared context passed to every node during execution.
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency.
#[derive(Clone)]
pub struct ExecutionContext {
    /// ID of the parent workflow.
    pub workflow_id: uuid::Uuid,
    /// ID of the current execution run.
    pub execution_id: uuid::Uuid,
    /// Tenant the execution runs under — enforced by the engine, never
    /// taken from caller-supplied input.
    pub tenant_id: String,
    /// Authenticated user who triggered the execution.
    pub user_id: String,
    /// Initial input supplied when the execution was triggered.
    pub input: Value,
    /// Decrypted secrets scoped to this workflow.
    pub secrets: std::collections::HashMap<String, String>,
    /// A copy of the workflow's `global_config`, readable by every node.
    pub global_context: Value,
    /// External capabilities (retrieval, LLM gateways, identity, clock).
    pub collaborators: Arc<Collaborators>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("workflow_id", &self.workflow_id)
            .field("execution_id", &self.execution_id)
            .field("tenant_id", &self.tenant_id)
            .field("user_id", &self.user_id)
            .field("input", &self.input)
            .field("global_context", &self.global_context)
            .finish_non_exhaustive()
    }
}

/// The core node trait.
///
/// All built-in nodes and future plugin node types must implement this.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Execute the node against its resolved input (already assembled by
    /// the input resolver from upstream outputs, edge conditions/transforms,
    /// and config overrides) and return this node's JSON output.
    ///
    /// `config` is the node's own declared `NodeDefinition.config` — static
    /// per-node behaviour switches (`select_path`, `prompt_key`, `mode`,
    /// `timeout`, …) as opposed to `input`, which is the dynamic, per-run
    /// resolved payload.
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError>;
}
