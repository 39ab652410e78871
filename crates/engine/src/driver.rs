//! Execution Engine — drives a single workflow execution end to end:
//! validates, builds the per-node context, dispatches to the serial path or
//! the scheduler, assembles the final output, and streams progress.
//!
//! The serial loop handles strictly linear graphs; branching or
//! parallelizable graphs delegate to [`crate::scheduler::run_parallel`]
//! instead of calling nodes directly.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use nodes::collaborators::Collaborators;
use nodes::ExecutionContext as NodeContext;

use crate::dag;
use crate::metrics::{MetricsRegistry, NodeOutcome as MetricOutcome};
use crate::models::{
    Edge, ExecutionContext, ExecutionStatus, ExecutionStep, Node, SecretsMap, StepStatus,
    WorkflowDefinition,
};
use crate::recovery::RecoveryState;
use crate::resolver;
use crate::runner::{self, NodeOutcome, NodeRegistry};
use crate::scheduler::{self, ResourcePool};
use crate::validator;
use crate::EngineError;

/// Per-call knobs. `enable_parallel` is three-valued: `None` defers to the
/// driver's own default (serial), `Some(true)`/`Some(false)` are explicit.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub tenant_id: String,
    pub user_id: String,
    pub secrets: SecretsMap,
    pub debug: bool,
    pub enable_parallel: Option<bool>,
    pub max_workers: usize,
    pub execution_id: Option<Uuid>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            user_id: String::new(),
            secrets: SecretsMap::new(),
            debug: false,
            enable_parallel: None,
            max_workers: 10,
            execution_id: None,
        }
    }
}

/// Fire-and-forget persistence hook. A failure here must never roll the
/// execution back or flip its status —
/// implementations log their own errors and return.
#[async_trait]
pub trait ExecutionPersistence: Send + Sync {
    async fn save_execution(
        &self,
        context: &ExecutionContext,
        tenant_id: &str,
        executor_id: &str,
        debug: bool,
        enable_parallel: bool,
    );
}

type OnStep = Box<dyn FnMut(&ExecutionStep, usize, usize) + Send>;

/// Process-lifetime engine state: node registry, collaborators, recovery
/// breaker/retry state, metrics, resource pool, and the live-executions
/// map, all shared across every execution the driver runs.
pub struct Driver {
    registry: NodeRegistry,
    collaborators: Arc<Collaborators>,
    recovery: Arc<RecoveryState>,
    metrics: Arc<MetricsRegistry>,
    pool: Arc<ResourcePool>,
    persistence: Option<Arc<dyn ExecutionPersistence>>,
    live: RwLock<HashMap<Uuid, ExecutionContext>>,
}

impl Driver {
    pub fn new(registry: NodeRegistry, collaborators: Arc<Collaborators>, pool: Arc<ResourcePool>) -> Self {
        Self {
            registry,
            collaborators,
            recovery: Arc::new(RecoveryState::new()),
            metrics: Arc::new(MetricsRegistry::new()),
            pool,
            persistence: None,
            live: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn ExecutionPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn recovery(&self) -> &RecoveryState {
        &self.recovery
    }

    // -----------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------

    /// `execute(def, input, opts) → context`.
    pub async fn execute(
        &self,
        def: &WorkflowDefinition,
        input_data: Value,
        opts: ExecutionOptions,
    ) -> ExecutionContext {
        self.execute_workflow(def, input_data, opts, None).await
    }

    /// The fuller entry point: same as `execute` but with an optional step
    /// callback, invoked `(step, completed, total)`
    /// after every node finishes. A panic inside the callback is caught and
    /// discarded — it must never abort the execution it's merely observing.
    pub async fn execute_workflow(
        &self,
        def: &WorkflowDefinition,
        input_data: Value,
        opts: ExecutionOptions,
        on_step: Option<OnStep>,
    ) -> ExecutionContext {
        let mut context = self.new_context(def, input_data, &opts);

        let report = validator::validate(def);
        if !report.ok {
            let message = report
                .errors
                .iter()
                .map(|e| e.message.clone())
                .collect::<Vec<_>>()
                .join("; ");
            context.finish(ExecutionStatus::Error, Value::Null, Some(message));
            return context;
        }
        if let Err(e) = validator::validate_inputs(def, &context.input_data) {
            context.finish(ExecutionStatus::Error, Value::Null, Some(e.to_string()));
            return context;
        }

        self.register(context.clone()).await;

        let parallel = opts.enable_parallel.unwrap_or(false) && def.nodes.len() > 2;
        let mut on_step = on_step;
        let result = if parallel {
            self.run_parallel_path(def, &mut context, &opts, &mut on_step).await
        } else {
            self.run_serial_path(def, &mut context, &opts, &mut on_step).await
        };

        let duration = (chrono::Utc::now() - context.start_time).num_milliseconds() as f64 / 1000.0;
        match result {
            Ok(()) => {
                context.finish(ExecutionStatus::Completed, context.output_data.clone(), None);
                self.metrics.record_workflow(def.id, duration, false);
            }
            Err(err) => {
                context.finish(ExecutionStatus::Error, Value::Null, Some(err.to_string()));
                self.metrics.record_workflow(def.id, duration, true);
            }
        }

        self.unregister(context.execution_id).await;
        self.recovery.clear_retry_counts(context.execution_id);
        if let Some(p) = &self.persistence {
            p.save_execution(&context, &opts.tenant_id, &opts.user_id, opts.debug, parallel)
                .await;
        }
        context
    }

    /// `execute_stream(def, input, opts) → event stream`, SSE-style lines
    /// always driven through the serial path so progress can be emitted in
    /// topological order as each node finishes.
    pub fn execute_stream<'a>(
        &'a self,
        def: &'a WorkflowDefinition,
        input_data: Value,
        opts: ExecutionOptions,
    ) -> impl Stream<Item = String> + 'a {
        async_stream::stream! {
            yield sse_line(&StreamEvent::Started);

            let report = validator::validate(def);
            if !report.ok {
                let message = report.errors.iter().map(|e| e.message.clone()).collect::<Vec<_>>().join("; ");
                yield sse_line(&StreamEvent::Error { error: ErrorPayload { message, kind: "validation_error".into() } });
                yield DONE_LINE.to_string();
                return;
            }

            let mut context = self.new_context(def, input_data, &opts);
            if let Err(e) = validator::validate_inputs(def, &context.input_data) {
                context.finish(ExecutionStatus::Error, Value::Null, Some(e.to_string()));
                yield sse_line(&StreamEvent::Error { error: ErrorPayload { message: e.to_string(), kind: "input_validation_error".into() } });
                yield DONE_LINE.to_string();
                return;
            }
            self.register(context.clone()).await;

            let topo = match dag::validate_dag(def) {
                Ok(t) => t,
                Err(e) => {
                    context.finish(ExecutionStatus::Error, Value::Null, Some(e.to_string()));
                    self.unregister(context.execution_id).await;
                    yield sse_line(&StreamEvent::Error { error: ErrorPayload { message: e.to_string(), kind: "cycle_detected".into() } });
                    yield DONE_LINE.to_string();
                    return;
                }
            };

            let node_by_id: HashMap<&str, &Node> = def.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
            let incoming_by_target = build_incoming(def);
            let source_names = resolver::source_output_names(def);
            let mut node_data: HashMap<String, Value> = HashMap::new();
            let total = topo.len();
            let mut failure: Option<EngineError> = None;

            for (i, node_id) in topo.iter().enumerate() {
                let node = node_by_id[node_id.as_str()];
                let incoming: Vec<&Edge> = incoming_by_target.get(node_id.as_str()).cloned().unwrap_or_default();
                let input = resolver::resolve_inputs(node, &incoming, &node_data, &context.input_data, &context.global_context, &source_names);
                let mut step = ExecutionStep::new(node.id.clone(), node.name.clone(), input.clone());
                step.status = StepStatus::Running;

                let node_ctx = self.node_ctx_for(def, context.execution_id, &context.input_data, &context.global_context, &opts);
                let start = std::time::Instant::now();
                let outcome = runner::run_node_with_recovery(
                    &self.registry,
                    &self.recovery,
                    node,
                    input,
                    &node_ctx,
                    context.execution_id,
                )
                .await;
                let elapsed = start.elapsed().as_secs_f64();

                let errored = match outcome {
                    Ok(NodeOutcome::Completed(output)) => {
                        step.finish(StepStatus::Completed, Some(output.clone()), None);
                        self.metrics.record_node(node_id, elapsed, MetricOutcome::Success);
                        node_data.insert(node_id.clone(), output);
                        false
                    }
                    Ok(NodeOutcome::Recovered { output, original_error, action }) => {
                        step.metrics = serde_json::json!({"recovery": {"action": action, "message": original_error}});
                        step.finish(StepStatus::Recovered, Some(output.clone()), Some(original_error));
                        self.metrics.record_node(node_id, elapsed, MetricOutcome::Recovered);
                        node_data.insert(node_id.clone(), output);
                        false
                    }
                    Ok(NodeOutcome::Ignored) => {
                        step.finish(StepStatus::Ignored, Some(Value::Object(Map::new())), None);
                        self.metrics.record_node(node_id, elapsed, MetricOutcome::Error);
                        node_data.insert(node_id.clone(), Value::Object(Map::new()));
                        false
                    }
                    Err(err) => {
                        step.finish(StepStatus::Error, None, Some(err.to_string()));
                        self.metrics.record_node(node_id, elapsed, MetricOutcome::Error);
                        failure = Some(err);
                        true
                    }
                };

                context.steps.push(step.clone());
                yield sse_line(&StreamEvent::Progress {
                    step: StepView::project(&step, opts.debug),
                    progress: ProgressCounts { current: i + 1, total },
                });
                if errored {
                    break;
                }
            }

            let duration = (chrono::Utc::now() - context.start_time).num_milliseconds() as f64 / 1000.0;
            if let Some(err) = failure {
                context.finish(ExecutionStatus::Error, Value::Null, Some(err.to_string()));
                self.metrics.record_workflow(def.id, duration, true);
                self.unregister(context.execution_id).await;
                self.recovery.clear_retry_counts(context.execution_id);
                if let Some(p) = &self.persistence {
                    p.save_execution(&context, &opts.tenant_id, &opts.user_id, opts.debug, false).await;
                }
                yield sse_line(&StreamEvent::Error { error: ErrorPayload { message: err.to_string(), kind: "execution_error".into() } });
            } else {
                let output = assemble_output(def, &node_data, &topo);
                context.finish(ExecutionStatus::Completed, output, None);
                self.metrics.record_workflow(def.id, duration, false);
                self.unregister(context.execution_id).await;
                self.recovery.clear_retry_counts(context.execution_id);
                if let Some(p) = &self.persistence {
                    p.save_execution(&context, &opts.tenant_id, &opts.user_id, opts.debug, false).await;
                }
                yield sse_line(&StreamEvent::Complete {
                    result: CompleteResult {
                        execution_id: context.execution_id,
                        status: context.status,
                        output_data: context.output_data.clone(),
                        error: context.error.clone(),
                        metrics: Value::Null,
                    },
                });
            }
            yield DONE_LINE.to_string();
        }
    }

    /// `stop(execution_id) → bool`. In-flight node calls aren't forcibly
    /// interrupted; the caller only learns this was requested, not that
    /// execution has actually halted.
    pub async fn stop(&self, execution_id: Uuid) -> bool {
        let mut live = self.live.write().await;
        if let Some(context) = live.get_mut(&execution_id) {
            context.finish(ExecutionStatus::Stopped, context.output_data.clone(), None);
            live.remove(&execution_id);
            true
        } else {
            false
        }
    }

    /// `get_status(execution_id) → context | none`.
    pub async fn get_status(&self, execution_id: Uuid) -> Option<ExecutionContext> {
        self.live.read().await.get(&execution_id).cloned()
    }

    /// `retry_from(def, base, start_node_id) → context`.
    /// Thin wrapper over [`crate::retry_from::retry_from`] that supplies
    /// this driver's shared registry/collaborators/recovery/metrics state,
    /// the same state every other entry point uses.
    pub async fn retry_from(
        &self,
        def: &WorkflowDefinition,
        base: &ExecutionContext,
        start_node_id: &str,
        opts: crate::retry_from::RetryOptions,
    ) -> Result<ExecutionContext, EngineError> {
        crate::retry_from::retry_from(
            &self.registry,
            &self.collaborators,
            &self.recovery,
            &self.metrics,
            def,
            base,
            start_node_id,
            opts,
        )
        .await
    }

    // -----------------------------------------------------------------
    // Admin operations
    // -----------------------------------------------------------------

    pub fn clear_error_history(&self) {
        self.recovery.clear_history();
    }

    pub fn reset_circuit_breakers(&self) {
        self.recovery.reset_all_breakers();
    }

    pub fn clear_retry_counts(&self, execution_id: Uuid) {
        self.recovery.clear_retry_counts(execution_id);
    }

    /// `clear_cache(execution_id?)` — drop a single execution's live-map
    /// slice, or every currently-live execution when no id is given.
    pub async fn clear_cache(&self, execution_id: Option<Uuid>) {
        let mut live = self.live.write().await;
        match execution_id {
            Some(id) => {
                live.remove(&id);
            }
            None => live.clear(),
        }
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn new_context(&self, def: &WorkflowDefinition, input_data: Value, opts: &ExecutionOptions) -> ExecutionContext {
        let mut context = ExecutionContext::new(def.id, input_data, def.global_config.clone());
        if let Some(id) = opts.execution_id {
            context.execution_id = id;
        }
        context.status = ExecutionStatus::Running;
        context
    }

    async fn register(&self, context: ExecutionContext) {
        self.live.write().await.insert(context.execution_id, context);
    }

    async fn unregister(&self, execution_id: Uuid) {
        self.live.write().await.remove(&execution_id);
    }

    fn node_ctx_for(
        &self,
        def: &WorkflowDefinition,
        execution_id: Uuid,
        input_data: &Value,
        global_context: &Value,
        opts: &ExecutionOptions,
    ) -> NodeContext {
        NodeContext {
            workflow_id: def.id,
            execution_id,
            tenant_id: opts.tenant_id.clone(),
            user_id: opts.user_id.clone(),
            input: input_data.clone(),
            secrets: opts.secrets.clone(),
            global_context: global_context.clone(),
            collaborators: self.collaborators.clone(),
        }
    }

    async fn run_serial_path(
        &self,
        def: &WorkflowDefinition,
        context: &mut ExecutionContext,
        opts: &ExecutionOptions,
        on_step: &mut Option<OnStep>,
    ) -> Result<(), EngineError> {
        let topo = dag::validate_dag(def)?;
        let node_by_id: HashMap<&str, &Node> = def.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let incoming_by_target = build_incoming(def);
        let source_names = resolver::source_output_names(def);
        let mut node_data: HashMap<String, Value> = HashMap::new();
        let total = topo.len();

        for (i, node_id) in topo.iter().enumerate() {
            let node = node_by_id[node_id.as_str()];
            let incoming: Vec<&Edge> = incoming_by_target.get(node_id.as_str()).cloned().unwrap_or_default();
            let input = resolver::resolve_inputs(node, &incoming, &node_data, &context.input_data, &context.global_context, &source_names);
            let mut step = ExecutionStep::new(node.id.clone(), node.name.clone(), input.clone());
            step.status = StepStatus::Running;

            let node_ctx = self.node_ctx_for(def, context.execution_id, &context.input_data, &context.global_context, opts);
            let start = std::time::Instant::now();
            let outcome = runner::run_node_with_recovery(
                &self.registry,
                &self.recovery,
                node,
                input,
                &node_ctx,
                context.execution_id,
            )
            .await;
            let elapsed = start.elapsed().as_secs_f64();

            let failed = match outcome {
                Ok(NodeOutcome::Completed(output)) => {
                    step.finish(StepStatus::Completed, Some(output.clone()), None);
                    self.metrics.record_node(node_id, elapsed, MetricOutcome::Success);
                    node_data.insert(node_id.clone(), output);
                    None
                }
                Ok(NodeOutcome::Recovered { output, original_error, action }) => {
                    step.metrics = serde_json::json!({"recovery": {"action": action, "message": original_error}});
                    step.finish(StepStatus::Recovered, Some(output.clone()), Some(original_error));
                    self.metrics.record_node(node_id, elapsed, MetricOutcome::Recovered);
                    node_data.insert(node_id.clone(), output);
                    None
                }
                Ok(NodeOutcome::Ignored) => {
                    step.finish(StepStatus::Ignored, Some(Value::Object(Map::new())), None);
                    self.metrics.record_node(node_id, elapsed, MetricOutcome::Error);
                    node_data.insert(node_id.clone(), Value::Object(Map::new()));
                    None
                }
                Err(err) => {
                    step.finish(StepStatus::Error, None, Some(err.to_string()));
                    self.metrics.record_node(node_id, elapsed, MetricOutcome::Error);
                    Some(err)
                }
            };

            context.steps.push(step.clone());
            invoke_on_step(on_step, &step, i + 1, total);
            if let Some(err) = failed {
                return Err(err);
            }
        }

        context.output_data = assemble_output(def, &node_data, &topo);
        Ok(())
    }

    async fn run_parallel_path(
        &self,
        def: &WorkflowDefinition,
        context: &mut ExecutionContext,
        opts: &ExecutionOptions,
        on_step: &mut Option<OnStep>,
    ) -> Result<(), EngineError> {
        let total = def.nodes.len();
        let counter = AtomicUsize::new(0);
        let mut seen_steps: Vec<ExecutionStep> = Vec::with_capacity(total);
        let execution_id = context.execution_id;
        let input_data = context.input_data.clone();
        let global_context = context.global_context.clone();

        let outputs = {
            let node_ctx_for = |_node_id: &str| {
                self.node_ctx_for(def, execution_id, &input_data, &global_context, opts)
            };
            scheduler::run_parallel(
                def,
                execution_id,
                &input_data,
                &global_context,
                &self.registry,
                &self.recovery,
                &self.metrics,
                &self.pool,
                node_ctx_for,
                opts.max_workers,
                |step| {
                    let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    invoke_on_step(on_step, &step, current, total);
                    seen_steps.push(step);
                },
            )
            .await?
        };

        context.steps.extend(seen_steps);
        let topo = dag::validate_dag(def)?;
        context.output_data = assemble_output(def, &outputs, &topo);
        Ok(())
    }
}

fn invoke_on_step(on_step: &mut Option<OnStep>, step: &ExecutionStep, current: usize, total: usize) {
    if let Some(cb) = on_step {
        let _ = std::panic::catch_unwind(AssertUnwindSafe(|| cb(step, current, total)));
    }
}

fn build_incoming(def: &WorkflowDefinition) -> HashMap<&str, Vec<&Edge>> {
    let mut map: HashMap<&str, Vec<&Edge>> = HashMap::new();
    for edge in &def.edges {
        map.entry(edge.target.as_str()).or_default().push(edge);
    }
    map
}

/// Final-output assembly rule shared by full and partial re-execution: merge
/// every `output`-type node's result, in declaration order, into one object;
/// else fall back to `fallback_order`'s last entry; else `{}`.
pub(crate) fn assemble_output(
    def: &WorkflowDefinition,
    node_data: &HashMap<String, Value>,
    fallback_order: &[String],
) -> Value {
    let output_ids: Vec<&str> = def.output_nodes().map(|n| n.id.as_str()).collect();
    if !output_ids.is_empty() {
        let mut merged = Map::new();
        for id in output_ids {
            match node_data.get(id) {
                Some(Value::Object(obj)) => merged.extend(obj.clone()),
                Some(other) => {
                    merged.insert(id.to_string(), other.clone());
                }
                None => {}
            }
        }
        return Value::Object(merged);
    }

    if let Some(last_id) = fallback_order.last() {
        if let Some(v) = node_data.get(last_id) {
            return v.clone();
        }
    }
    Value::Object(Map::new())
}

// ---------------------------------------------------------------------------
// Streaming event protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ProgressCounts {
    pub current: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteResult {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub output_data: Value,
    pub error: Option<String>,
    pub metrics: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A step projected for the wire: non-debug mode exposes only `output_keys`;
/// debug mode carries the full `input`/`output` payloads.
#[derive(Debug, Clone, Serialize)]
pub struct StepView {
    pub id: Uuid,
    pub node_id: String,
    pub node_name: String,
    pub status: StepStatus,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub duration: Option<f64>,
    pub error: Option<String>,
    pub memory: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_keys: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl StepView {
    fn project(step: &ExecutionStep, debug: bool) -> Self {
        let (output_keys, input, output) = if debug {
            (None, Some(step.input_data.clone()), step.output_data.clone())
        } else {
            let keys = step
                .output_data
                .as_ref()
                .and_then(Value::as_object)
                .map(|obj| obj.keys().cloned().collect())
                .unwrap_or_default();
            (Some(keys), None, None)
        };
        Self {
            id: step.step_id,
            node_id: step.node_id.clone(),
            node_name: step.node_name.clone(),
            status: step.status,
            start_time: step.start_time,
            end_time: step.end_time,
            duration: step.duration,
            error: step.error.clone(),
            memory: step.memory_usage,
            output_keys,
            input,
            output,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamEvent {
    Started,
    Progress { step: StepView, progress: ProgressCounts },
    Complete { result: CompleteResult },
    Error { error: ErrorPayload },
}

const DONE_LINE: &str = "data: [DONE]\n\n";

fn sse_line(event: &StreamEvent) -> String {
    format!("data: {}\n\n", serde_json::to_string(event).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Node, Position};
    use futures::StreamExt;
    use nodes::collaborators::stub::{
        StubChatProvider, StubEmbeddingProvider, StubIdentityService, StubKeywordIndex, StubRerankProvider,
        StubVectorStore, SystemClock,
    };

    fn test_collaborators() -> Arc<Collaborators> {
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

    fn driver() -> Driver {
        let pool = Arc::new(ResourcePool::new(crate::models::ResourceAmounts {
            cpu_cores: 8.0,
            memory_mb: 8192.0,
            network_mbps: 1000.0,
            gpu_mb: 0.0,
            storage_io: 100.0,
        }));
        Driver::new(nodes::builtin_registry(), test_collaborators(), pool)
    }

    #[tokio::test]
    async fn serial_execution_assembles_output_node_result() {
        let def = WorkflowDefinition::new(
            "wf",
            vec![node("in", "input"), node("out", "output")],
            vec![edge("in", "out")],
        );
        let ctx = driver()
            .execute(&def, serde_json::json!({"text": "hello"}), ExecutionOptions::default())
            .await;
        assert_eq!(ctx.status, ExecutionStatus::Completed);
        assert_eq!(ctx.steps.len(), 2);
    }

    #[tokio::test]
    async fn parallel_execution_produces_same_completion_status() {
        let def = WorkflowDefinition::new(
            "wf",
            vec![
                node("in", "input"),
                node("a", "data_transformer"),
                node("b", "data_transformer"),
                node("out", "output"),
            ],
            vec![edge("in", "a"), edge("in", "b"), edge("a", "out"), edge("b", "out")],
        );
        let opts = ExecutionOptions {
            enable_parallel: Some(true),
            ..Default::default()
        };
        let ctx = driver().execute(&def, serde_json::json!({"data": {}}), opts).await;
        assert_eq!(ctx.status, ExecutionStatus::Completed);
        assert_eq!(ctx.steps.len(), 4);
    }

    #[tokio::test]
    async fn stream_ends_with_done_marker() {
        let def = WorkflowDefinition::new("wf", vec![node("in", "input"), node("out", "output")], vec![edge("in", "out")]);
        let d = driver();
        let events: Vec<String> = d
            .execute_stream(&def, serde_json::json!({"text": "hi"}), ExecutionOptions::default())
            .collect()
            .await;
        assert_eq!(events.last().unwrap(), DONE_LINE);
        assert!(events[0].contains("\"type\":\"started\""));
    }

    #[tokio::test]
    async fn missing_required_ui_input_fails_before_any_step_runs() {
        let mut def =
            WorkflowDefinition::new("wf", vec![node("in", "input"), node("out", "output")], vec![edge("in", "out")]);
        def.metadata =
            serde_json::json!({"ui": {"inputs": [{"name": "query", "required": true, "type": "string"}]}});
        let ctx = driver().execute(&def, serde_json::json!({}), ExecutionOptions::default()).await;
        assert_eq!(ctx.status, ExecutionStatus::Error);
        assert!(ctx.steps.is_empty());
    }

    #[tokio::test]
    async fn get_status_returns_none_after_completion() {
        let def = WorkflowDefinition::new("wf", vec![node("in", "input"), node("out", "output")], vec![edge("in", "out")]);
        let d = driver();
        let ctx = d.execute(&def, serde_json::json!({"text": "hi"}), ExecutionOptions::default()).await;
        assert!(d.get_status(ctx.execution_id).await.is_none());
    }
}
