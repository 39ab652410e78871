//! Shared node-execution-with-recovery helper, reused verbatim by the
//! serial driver path and the scheduler's batch execution so the two paths
//! can never drift on recovery semantics.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use nodes::{ExecutableNode, ExecutionContext as NodeContext, NodeError};

use crate::models::Node;
use crate::recovery::{self, RecoveryDecision, RecoveryState, RecoveryStrategy, WorkflowError};
use crate::EngineError;

/// Keyed by the `node_type` tag, matching [`nodes::builtin_registry`]'s shape.
pub type NodeRegistry = HashMap<String, Arc<dyn ExecutableNode>>;

/// What a single node call settled on, once the recovery loop gives up
/// retrying. `Err` is reserved for outcomes the caller must treat as an
/// execution-aborting failure (a fatal node error, or a non-recoverable
/// strategy with `retries exhausted` and no `ignore_errors` escape hatch).
pub enum NodeOutcome {
    Completed(Value),
    /// The policy gave up gracefully — `skip_node`, `use_fallback`,
    /// `use_cached_result`, `use_default_value`, or a `circuit_break` whose
    /// breaker (already open or freshly tripped) short-circuited the call.
    Recovered {
        output: Value,
        original_error: String,
        action: &'static str,
    },
    /// `node.config.ignore_errors` absorbed what would otherwise be a fatal
    /// failure; the node is marked ignored and returns an empty object.
    Ignored,
}

/// Run `node` against `input`, driving the recovery handler loop on every
/// classified failure up to its policy's attempt budget. Breaker state and
/// retry counters live in `recovery_state`,
/// shared across the whole execution (and, for breakers, the whole engine
/// process).
pub async fn run_node_with_recovery(
    registry: &NodeRegistry,
    recovery_state: &RecoveryState,
    node: &Node,
    input: Value,
    node_ctx: &NodeContext,
    execution_id: Uuid,
) -> Result<NodeOutcome, EngineError> {
    let executable = registry
        .get(&node.node_type)
        .ok_or_else(|| EngineError::UnknownNodeType(node.node_type.clone()))?;

    let breaker_cfg = recovery::parse_breaker_config(&node.config);
    let now = node_ctx.collaborators.clock.now_seconds();
    if let Some(remaining) = recovery_state.breaker_block(&node.id, now, &breaker_cfg) {
        let message = format!(
            "circuit open for node '{}' ({:.0}s remaining)",
            node.id, remaining
        );
        tracing::warn!(node_id = %node.id, remaining, "circuit breaker open, short-circuiting node");
        return Ok(NodeOutcome::Recovered {
            output: recovery::circuit_open_fallback(&message),
            original_error: message,
            action: RecoveryStrategy::CircuitBreak.name(),
        });
    }

    let node_override = recovery::parse_node_recovery_override(&node.config);

    loop {
        match executable.execute(input.clone(), &node.config, node_ctx).await {
            Ok(output) => {
                recovery_state.record_success(&node.id);
                return Ok(NodeOutcome::Completed(output));
            }
            Err(err) if err.is_fatal() => {
                let now = node_ctx.collaborators.clock.now_seconds();
                recovery_state.record_failure(&node.id, now, &breaker_cfg);
                push_history(recovery_state, &node, &err, false, None);
                return Err(EngineError::NodeFatal {
                    node_id: node.id.clone(),
                    message: err.message().to_string(),
                });
            }
            Err(err) => {
                let now = node_ctx.collaborators.clock.now_seconds();
                let kind = err.kind();
                let decision = recovery::decide(
                    recovery_state,
                    &node.id,
                    execution_id,
                    kind,
                    node_override,
                    &breaker_cfg,
                    now,
                );

                let retry_after = match &decision {
                    RecoveryDecision::RetryAfter(delay) => Some(delay.as_secs_f64()),
                    RecoveryDecision::Give(_) => None,
                };
                push_history(
                    recovery_state,
                    &node,
                    &err,
                    matches!(decision, RecoveryDecision::RetryAfter(_)),
                    retry_after,
                );

                match decision {
                    RecoveryDecision::RetryAfter(delay) => {
                        tracing::debug!(node_id = %node.id, ?delay, "retrying node after recoverable error");
                        node_ctx.collaborators.clock.sleep(delay).await;
                        continue;
                    }
                    RecoveryDecision::Give(strategy) => {
                        return terminal_outcome(node, strategy, &err);
                    }
                }
            }
        }
    }
}

fn push_history(
    recovery_state: &RecoveryState,
    node: &Node,
    err: &NodeError,
    recoverable: bool,
    retry_after: Option<f64>,
) {
    recovery_state.push_history(WorkflowError {
        message: err.message().to_string(),
        kind: err.kind().to_string(),
        node_id: node.id.clone(),
        step_id: None,
        recoverable,
        retry_after,
        context: Value::Null,
    });
}

/// Step 3/4 of the handler loop: translate a "give up" decision into the
/// node's final output, or into an execution-aborting error.
fn terminal_outcome(
    node: &Node,
    strategy: RecoveryStrategy,
    err: &NodeError,
) -> Result<NodeOutcome, EngineError> {
    match strategy {
        RecoveryStrategy::SkipNode
        | RecoveryStrategy::UseFallback
        | RecoveryStrategy::UseCachedResult
        | RecoveryStrategy::UseDefaultValue
        | RecoveryStrategy::CircuitBreak => Ok(NodeOutcome::Recovered {
            output: recovery::default_fallback(err.kind(), err.message()),
            original_error: err.message().to_string(),
            action: strategy.name(),
        }),
        RecoveryStrategy::Retry | RecoveryStrategy::FailFast | RecoveryStrategy::Rollback => {
            let ignore_errors = node
                .config
                .get("ignore_errors")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if ignore_errors {
                Ok(NodeOutcome::Ignored)
            } else {
                Err(EngineError::NodeRetryExhausted {
                    node_id: node.id.clone(),
                    message: err.message().to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Node, Position};
    use nodes::collaborators::stub::{
        StubChatProvider, StubEmbeddingProvider, StubIdentityService, StubKeywordIndex, StubRerankProvider,
        StubVectorStore, SystemClock,
    };
    use nodes::collaborators::Collaborators;
    use nodes::mock::{FlakyNode, MockNode};
    use std::sync::Arc;

    fn flaky_node(id: &str, max_retries: u64) -> Node {
        Node {
            id: id.into(),
            node_type: "flaky".into(),
            name: id.into(),
            config: serde_json::json!({
                "recovery": {
                    "strategy": "retry",
                    "backoff": "fixed_delay",
                    "max_retries": max_retries,
                    "initial_delay": 0.001,
                    "jitter": false,
                }
            }),
            position: Position::default(),
            signature: Default::default(),
        }
    }

    fn node_ctx() -> NodeContext {
        NodeContext {
            workflow_id: uuid::Uuid::nil(),
            execution_id: Uuid::new_v4(),
            tenant_id: "t".into(),
            user_id: "u".into(),
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

    /// Scenario 3 from the end-to-end seed cases: a node that fails 4 times
    /// then succeeds completes via the retry path, with the executed attempt
    /// count never exceeding `max_retries + 1`.
    #[tokio::test]
    async fn retries_until_success_then_completes() {
        let flaky = Arc::new(FlakyNode::new(4, "connection refused", serde_json::json!({"ok": true})));
        let mut registry: NodeRegistry = HashMap::new();
        registry.insert("flaky".into(), flaky.clone() as Arc<dyn ExecutableNode>);

        let node = flaky_node("n1", 5);
        let recovery = RecoveryState::new();
        let ctx = node_ctx();
        let outcome = run_node_with_recovery(&registry, &recovery, &node, Value::Null, &ctx, ctx.execution_id)
            .await
            .unwrap();

        assert!(matches!(outcome, NodeOutcome::Completed(_)));
        assert_eq!(flaky.attempt_count(), 5);
    }

    /// When the policy's `max_retries` is exhausted before the node ever
    /// succeeds, the loop gives up and surfaces a retry-exhausted error
    /// rather than looping forever.
    #[tokio::test]
    async fn gives_up_once_max_retries_is_exhausted() {
        let flaky = Arc::new(FlakyNode::new(10, "connection refused", serde_json::json!({"ok": true})));
        let mut registry: NodeRegistry = HashMap::new();
        registry.insert("flaky".into(), flaky.clone() as Arc<dyn ExecutableNode>);

        let node = flaky_node("n1", 3);
        let recovery = RecoveryState::new();
        let ctx = node_ctx();
        let result = run_node_with_recovery(&registry, &recovery, &node, Value::Null, &ctx, ctx.execution_id).await;

        assert!(result.is_err());
        // At most max_retries + 1 executed attempts.
        assert!(flaky.attempt_count() <= 4);
    }

    /// Scenario 4: once five consecutive failures trip the breaker, the next
    /// call short-circuits without ever invoking the node runtime.
    #[tokio::test]
    async fn open_circuit_breaker_short_circuits_without_running_the_node() {
        let node = Node {
            id: "n1".into(),
            node_type: "flaky".into(),
            name: "n1".into(),
            config: serde_json::json!({
                "recovery": {"strategy": "circuit_break", "backoff": "fixed_delay", "max_retries": 0}
            }),
            position: Position::default(),
            signature: Default::default(),
        };

        let always_fails = Arc::new(MockNode::failing_retryable("n1", "connection refused"));
        let mut registry: NodeRegistry = HashMap::new();
        registry.insert("flaky".into(), always_fails.clone() as Arc<dyn ExecutableNode>);

        let recovery = RecoveryState::new();
        let ctx = node_ctx();

        for _ in 0..5 {
            let outcome =
                run_node_with_recovery(&registry, &recovery, &node, Value::Null, &ctx, ctx.execution_id).await;
            assert!(matches!(outcome, Ok(NodeOutcome::Recovered { .. })));
        }
        assert_eq!(always_fails.call_count(), 5);

        let outcome =
            run_node_with_recovery(&registry, &recovery, &node, Value::Null, &ctx, ctx.execution_id).await;
        assert!(matches!(outcome, Ok(NodeOutcome::Recovered { .. })));
        // The sixth call must short-circuit: the mock is never invoked again.
        assert_eq!(always_fails.call_count(), 5);
    }
}
