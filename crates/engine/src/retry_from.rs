//! Partial Re-execution — re-run a single node and its descendants from a
//! prior execution, reusing everything upstream.
//!
//! Reuses the same `node_data`-map-plus-topological-iteration pattern the
//! full-run driver applies, restricted here to the affected subset.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use nodes::collaborators::Collaborators;
use nodes::ExecutionContext as NodeContext;
use std::sync::Arc;

use crate::dag;
use crate::driver::assemble_output;
use crate::metrics::{MetricsRegistry, NodeOutcome as MetricOutcome};
use crate::models::{
    Edge, ExecutionContext, ExecutionStatus, ExecutionStep, Node, SecretsMap, StepStatus,
    WorkflowDefinition,
};
use crate::recovery::RecoveryState;
use crate::resolver;
use crate::runner::{self, NodeOutcome, NodeRegistry};
use crate::validator;
use crate::EngineError;

/// Per-call identity/secrets the re-run needs — the same shape
/// `driver::ExecutionOptions` carries, kept separate since C7 has no notion
/// of `enable_parallel`/`max_workers` — this path always iterates serially.
#[derive(Debug, Clone, Default)]
pub struct RetryOptions {
    pub tenant_id: String,
    pub user_id: String,
    pub secrets: SecretsMap,
}

/// `retry_from(def, base, start_node_id)`.
///
/// Builds a fresh [`ExecutionContext`] whose `steps` cover exactly
/// `{start_node_id} ∪ descendants(start_node_id)`; every other node's
/// output is carried over byte-identical from `base.steps[*].output_data`.
pub async fn retry_from(
    registry: &NodeRegistry,
    collaborators: &Arc<Collaborators>,
    recovery: &RecoveryState,
    metrics: &MetricsRegistry,
    def: &WorkflowDefinition,
    base: &ExecutionContext,
    start_node_id: &str,
    opts: RetryOptions,
) -> Result<ExecutionContext, EngineError> {
    let report = validator::validate(def);
    if !report.ok {
        let message = report
            .errors
            .iter()
            .map(|e| e.message.clone())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(EngineError::ValidationFailed(vec![message]));
    }

    if !def.nodes.iter().any(|n| n.id == start_node_id) {
        return Err(EngineError::UnknownRetryNode(start_node_id.to_string()));
    }

    let topo = dag::validate_dag(def)?;
    let affected = affected_set(def, start_node_id);

    let mut context = ExecutionContext::new(def.id, base.input_data.clone(), def.global_config.clone());
    context.status = ExecutionStatus::Running;

    // Seed `node_data` with the base execution's outputs for every
    // non-affected node — affected nodes are recomputed from scratch.
    let mut node_data: HashMap<String, Value> = HashMap::new();
    for step in &base.steps {
        if !affected.contains(step.node_id.as_str()) {
            if let Some(output) = step.output_data.clone() {
                node_data.insert(step.node_id.clone(), output);
            }
        }
    }

    let node_by_id: HashMap<&str, &Node> = def.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let incoming_by_target = build_incoming(def);
    let source_names = resolver::source_output_names(def);
    let mut affected_order: Vec<String> = Vec::new();
    let mut failure: Option<EngineError> = None;

    for node_id in &topo {
        if !affected.contains(node_id.as_str()) {
            continue;
        }
        affected_order.push(node_id.clone());
        let node = node_by_id[node_id.as_str()];
        let incoming: Vec<&Edge> = incoming_by_target.get(node_id.as_str()).cloned().unwrap_or_default();
        let input = resolver::resolve_inputs(node, &incoming, &node_data, &context.input_data, &context.global_context, &source_names);
        let mut step = ExecutionStep::new(node.id.clone(), node.name.clone(), input.clone());
        step.status = StepStatus::Running;

        let node_ctx = NodeContext {
            workflow_id: def.id,
            execution_id: context.execution_id,
            tenant_id: opts.tenant_id.clone(),
            user_id: opts.user_id.clone(),
            input: context.input_data.clone(),
            secrets: opts.secrets.clone(),
            global_context: context.global_context.clone(),
            collaborators: collaborators.clone(),
        };

        let start = std::time::Instant::now();
        let outcome = runner::run_node_with_recovery(
            registry,
            recovery,
            node,
            input,
            &node_ctx,
            context.execution_id,
        )
        .await;
        let elapsed = start.elapsed().as_secs_f64();

        match outcome {
            Ok(NodeOutcome::Completed(output)) => {
                step.finish(StepStatus::Completed, Some(output.clone()), None);
                metrics.record_node(node_id, elapsed, MetricOutcome::Success);
                node_data.insert(node_id.clone(), output);
            }
            Ok(NodeOutcome::Recovered { output, original_error, action }) => {
                step.metrics = serde_json::json!({"recovery": {"action": action, "message": original_error}});
                step.finish(StepStatus::Recovered, Some(output.clone()), Some(original_error));
                metrics.record_node(node_id, elapsed, MetricOutcome::Recovered);
                node_data.insert(node_id.clone(), output);
            }
            Ok(NodeOutcome::Ignored) => {
                step.finish(StepStatus::Ignored, Some(serde_json::json!({})), None);
                metrics.record_node(node_id, elapsed, MetricOutcome::Error);
                node_data.insert(node_id.clone(), serde_json::json!({}));
            }
            Err(err) => {
                step.finish(StepStatus::Error, None, Some(err.to_string()));
                metrics.record_node(node_id, elapsed, MetricOutcome::Error);
                context.steps.push(step);
                failure = Some(err);
                break;
            }
        }
        context.steps.push(step);
    }

    if let Some(err) = failure {
        context.finish(ExecutionStatus::Error, Value::Null, Some(err.to_string()));
        return Ok(context);
    }

    let output = assemble_output(def, &node_data, &affected_order);
    context.finish(ExecutionStatus::Completed, output, None);
    Ok(context)
}

/// `{start_node_id} ∪ descendants(start_node_id)` over the edge set.
fn affected_set<'a>(def: &'a WorkflowDefinition, start_node_id: &'a str) -> HashSet<&'a str> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &def.edges {
        adjacency.entry(edge.source.as_str()).or_default().push(edge.target.as_str());
    }

    let mut affected: HashSet<&str> = HashSet::new();
    let mut stack = vec![start_node_id];
    while let Some(id) = stack.pop() {
        if !affected.insert(id) {
            continue;
        }
        if let Some(succs) = adjacency.get(id) {
            for &succ in succs {
                if !affected.contains(succ) {
                    stack.push(succ);
                }
            }
        }
    }
    affected
}

fn build_incoming(def: &WorkflowDefinition) -> HashMap<&str, Vec<&Edge>> {
    let mut map: HashMap<&str, Vec<&Edge>> = HashMap::new();
    for edge in &def.edges {
        map.entry(edge.target.as_str()).or_default().push(edge);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Node, Position};
    use nodes::collaborators::stub::{
        StubChatProvider, StubEmbeddingProvider, StubIdentityService, StubKeywordIndex, StubRerankProvider,
        StubVectorStore, SystemClock,
    };

    fn node(id: &str, node_type: &str) -> Node {
        Node {
            id: id.into(),
            node_type: node_type.into(),
            name: id.into(),
            config: Value::Null,
            position: Position::default(),
            signature: Default::default(),
        }
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge {
            id: format!("{source}->{target}"),
            source: source.into(),
            target: target.into(),
            source_output: None,
            target_input: None,
            condition: None,
            transform: None,
        }
    }

    fn collaborators() -> Arc<Collaborators> {
        Arc::new(Collaborators {
            identity: Arc::new(StubIdentityService::allowing()),
            embeddings: Arc::new(StubEmbeddingProvider { dim: 4 }),
            chat: Arc::new(StubChatProvider::returning("hi")),
            rerank: Arc::new(StubRerankProvider),
            vector_store: Arc::new(StubVectorStore::with_collection("t", vec![])),
            keyword_index: Some(Arc::new(StubKeywordIndex::with_index("t", vec![]))),
            clock: Arc::new(SystemClock),
        })
    }

    fn base_execution(def: &WorkflowDefinition) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(def.id, serde_json::json!({"text": "hi"}), Value::Null);
        for (id, output) in [("in", serde_json::json!({"text": "hi"})), ("a", serde_json::json!({"data": {"value": 1}})), ("out", serde_json::json!({"value": 1}))] {
            let mut step = ExecutionStep::new(id.to_string(), id.to_string(), Value::Null);
            step.finish(StepStatus::Completed, Some(output), None);
            ctx.steps.push(step);
        }
        ctx.finish(ExecutionStatus::Completed, serde_json::json!({"value": 1}), None);
        ctx
    }

    #[test]
    fn affected_set_includes_start_and_descendants() {
        let def = WorkflowDefinition::new(
            "wf",
            vec![node("in", "input"), node("a", "data_transformer"), node("out", "output")],
            vec![edge("in", "a"), edge("a", "out")],
        );
        let affected = affected_set(&def, "a");
        assert!(affected.contains("a"));
        assert!(affected.contains("out"));
        assert!(!affected.contains("in"));
    }

    #[tokio::test]
    async fn retry_from_reuses_non_affected_node_output() {
        let def = WorkflowDefinition::new(
            "wf",
            vec![node("in", "input"), node("a", "data_transformer"), node("out", "output")],
            vec![edge("in", "a"), edge("a", "out")],
        );
        let base = base_execution(&def);
        let recovery = RecoveryState::new();
        let metrics = MetricsRegistry::new();
        let registry = nodes::builtin_registry();
        let collaborators = collaborators();

        let ctx = retry_from(
            &registry,
            &collaborators,
            &recovery,
            &metrics,
            &def,
            &base,
            "a",
            RetryOptions::default(),
        )
        .await
        .expect("retry_from should succeed");

        assert_eq!(ctx.status, ExecutionStatus::Completed);
        let affected_ids: Vec<&str> = ctx.steps.iter().map(|s| s.node_id.as_str()).collect();
        assert_eq!(affected_ids, vec!["a", "out"]);
    }

    #[tokio::test]
    async fn retry_from_unknown_node_is_rejected() {
        let def = WorkflowDefinition::new("wf", vec![node("in", "input")], vec![]);
        let base = base_execution(&def);
        let recovery = RecoveryState::new();
        let metrics = MetricsRegistry::new();
        let registry = nodes::builtin_registry();
        let collaborators = collaborators();

        let result = retry_from(
            &registry,
            &collaborators,
            &recovery,
            &metrics,
            &def,
            &base,
            "ghost",
            RetryOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(EngineError::UnknownRetryNode(id)) if id == "ghost"));
    }
}
