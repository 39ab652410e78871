//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow and a running
//! execution look like in memory. They serialize to/from the JSONB
//! `definition`/`context` columns the `db` crate persists.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Node / signature / ports
// ---------------------------------------------------------------------------

/// The declared type of a port's value. Used only by the validator and the
/// input resolver's alias logic — the runtime never coerces values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    File,
    Image,
    Audio,
    Video,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSignature {
    #[serde(default)]
    pub inputs: Vec<PortSpec>,
    #[serde(default)]
    pub outputs: Vec<PortSpec>,
}

/// Display-only placement, carried through purely so round-tripping a
/// definition through the engine doesn't lose editor layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

/// A single step in the workflow graph — one entry in the closed node-type
/// set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    /// Maps to a registered `ExecutableNode` implementation. Tag from the
    /// closed set, e.g. `"llm"`, `"rag_retriever"`.
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: String,
    /// Arbitrary configuration passed to the node at execution time.
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub signature: NodeSignature,
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Directed edge from a source output port to a target input port,
/// optionally gated by a condition and modified by a transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub source_output: Option<String>,
    #[serde(default)]
    pub target_input: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub transform: Option<String>,
}

/// The universal alias recognised wherever a `source_output`/`target_input`
/// is unset or doesn't name a declared port.
pub const OUTPUT_ALIAS: &str = "output";
pub const INPUT_ALIAS: &str = "input";

impl Edge {
    pub fn is_output_alias(name: &str) -> bool {
        name == OUTPUT_ALIAS || name == "output-0" || name.starts_with("output-")
    }

    pub fn is_input_alias(name: &str) -> bool {
        name == INPUT_ALIAS || name == "input-0" || name.starts_with("input-")
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub global_config: Value,
    #[serde(default)]
    pub metadata: Value,
}

fn default_version() -> String {
    "1".to_string()
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            version: default_version(),
            description: String::new(),
            nodes,
            edges,
            global_config: Value::Null,
            metadata: Value::Null,
        }
    }

    pub fn output_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.node_type == "output")
    }
}

// ---------------------------------------------------------------------------
// ExecutionStep
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Recovered,
    Error,
    Ignored,
    Stopped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_id: Uuid,
    pub node_id: String,
    pub node_name: String,
    pub status: StepStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration: Option<f64>,
    pub input_data: Value,
    #[serde(default)]
    pub output_data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub memory_usage: Option<f64>,
    #[serde(default)]
    pub metrics: Value,
}

impl ExecutionStep {
    pub fn new(node_id: impl Into<String>, node_name: impl Into<String>, input_data: Value) -> Self {
        Self {
            step_id: Uuid::new_v4(),
            node_id: node_id.into(),
            node_name: node_name.into(),
            status: StepStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            input_data,
            output_data: None,
            error: None,
            memory_usage: None,
            metrics: Value::Null,
        }
    }

    pub fn finish(&mut self, status: StepStatus, output_data: Option<Value>, error: Option<String>) {
        let end = Utc::now();
        self.duration = Some((end - self.start_time).num_milliseconds() as f64 / 1000.0);
        self.end_time = Some(end);
        self.status = status;
        self.output_data = output_data;
        self.error = error;
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext (the C6-owned execution record — distinct from
// `nodes::ExecutionContext`, the per-node runtime context)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Error,
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub input_data: Value,
    #[serde(default)]
    pub output_data: Value,
    pub global_context: Value,
    #[serde(default)]
    pub steps: Vec<ExecutionStep>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metrics: Value,
    #[serde(default)]
    pub checkpoints: Vec<Value>,
}

impl ExecutionContext {
    pub fn new(workflow_id: Uuid, input_data: Value, global_context: Value) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            input_data,
            output_data: Value::Null,
            global_context,
            steps: Vec::new(),
            error: None,
            metrics: Value::Null,
            checkpoints: Vec::new(),
        }
    }

    pub fn finish(&mut self, status: ExecutionStatus, output_data: Value, error: Option<String>) {
        self.status = status;
        self.output_data = output_data;
        self.error = error;
        self.end_time = Some(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// ResourcePool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceAmounts {
    pub cpu_cores: f64,
    pub memory_mb: f64,
    pub network_mbps: f64,
    pub gpu_mb: f64,
    pub storage_io: f64,
}

impl ResourceAmounts {
    pub const ZERO: Self = Self {
        cpu_cores: 0.0,
        memory_mb: 0.0,
        network_mbps: 0.0,
        gpu_mb: 0.0,
        storage_io: 0.0,
    };

    pub fn fits_within(&self, remaining: &ResourceAmounts) -> bool {
        self.cpu_cores <= remaining.cpu_cores
            && self.memory_mb <= remaining.memory_mb
            && self.network_mbps <= remaining.network_mbps
            && self.gpu_mb <= remaining.gpu_mb
            && self.storage_io <= remaining.storage_io
    }

    pub fn add_assign(&mut self, other: &ResourceAmounts) {
        self.cpu_cores += other.cpu_cores;
        self.memory_mb += other.memory_mb;
        self.network_mbps += other.network_mbps;
        self.gpu_mb += other.gpu_mb;
        self.storage_io += other.storage_io;
    }

    pub fn sub_assign(&mut self, other: &ResourceAmounts) {
        self.cpu_cores -= other.cpu_cores;
        self.memory_mb -= other.memory_mb;
        self.network_mbps -= other.network_mbps;
        self.gpu_mb -= other.gpu_mb;
        self.storage_io -= other.storage_io;
    }
}

impl Default for ResourceAmounts {
    fn default() -> Self {
        Self::ZERO
    }
}

/// Totals and current usage. `engine::scheduler::ResourcePool` wraps this
/// behind a single `tokio::sync::Mutex`.
#[derive(Debug, Clone, Copy)]
pub struct ResourcePoolState {
    pub totals: ResourceAmounts,
    pub used: ResourceAmounts,
}

impl ResourcePoolState {
    pub fn new(totals: ResourceAmounts) -> Self {
        Self {
            totals,
            used: ResourceAmounts::ZERO,
        }
    }

    pub fn remaining(&self) -> ResourceAmounts {
        ResourceAmounts {
            cpu_cores: self.totals.cpu_cores - self.used.cpu_cores,
            memory_mb: self.totals.memory_mb - self.used.memory_mb,
            network_mbps: self.totals.network_mbps - self.used.network_mbps,
            gpu_mb: self.totals.gpu_mb - self.used.gpu_mb,
            storage_io: self.totals.storage_io - self.used.storage_io,
        }
    }

    pub fn can_allocate(&self, amount: &ResourceAmounts) -> bool {
        amount.fits_within(&self.remaining())
    }

    pub fn allocate(&mut self, amount: &ResourceAmounts) -> bool {
        if !self.can_allocate(amount) {
            return false;
        }
        self.used.add_assign(amount);
        true
    }

    pub fn release(&mut self, amount: &ResourceAmounts) {
        self.used.sub_assign(amount);
        // Guard against float drift pushing usage slightly negative.
        self.used.cpu_cores = self.used.cpu_cores.max(0.0);
        self.used.memory_mb = self.used.memory_mb.max(0.0);
        self.used.network_mbps = self.used.network_mbps.max(0.0);
        self.used.gpu_mb = self.used.gpu_mb.max(0.0);
        self.used.storage_io = self.used.storage_io.max(0.0);
    }
}

// ---------------------------------------------------------------------------
// CircuitBreakerState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitBreakerState {
    pub is_open: bool,
    pub failure_count: u32,
    pub last_failure_time: Option<f64>,
    pub success_count: u64,
    pub total_calls: u64,
}

/// Per-execution secrets map handed to nodes via
/// `nodes::ExecutionContext::secrets`. Kept here so both `engine` and
/// `nodes` agree on the shape without `nodes` depending on `engine`.
pub type SecretsMap = HashMap<String, String>;
