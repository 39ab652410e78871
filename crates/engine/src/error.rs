//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the workflow engine (validation, resolution, recovery,
/// scheduling, and execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------
    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference { node_id: String, side: &'static str },

    /// Topological sort detected a cycle.
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    /// `validate` found one or more blocking issues; carries the report's
    /// error entries so callers can surface them without re-validating.
    #[error("workflow failed validation: {0:?}")]
    ValidationFailed(Vec<String>),

    /// Caller-supplied `input_data` doesn't satisfy `metadata.ui.inputs`.
    #[error("input '{field}' failed validation: {reason}")]
    InputValidationFailed { field: String, reason: String },

    // ------ Execution errors ------
    /// A node failed with a fatal error; the whole execution is aborted.
    #[error("node '{node_id}' failed fatally: {message}")]
    NodeFatal { node_id: String, message: String },

    /// A node's retryable error was exhausted.
    #[error("node '{node_id}' exceeded retry limit: {message}")]
    NodeRetryExhausted { node_id: String, message: String },

    /// The node's circuit breaker is open; the call was short-circuited
    /// without being attempted.
    #[error("circuit open for node '{node_id}'")]
    CircuitOpen { node_id: String },

    /// No registered `ExecutableNode` implementation for this node type.
    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    /// No execution found for the given id (used by `status`/`stop`/`retry_from`).
    #[error("no such execution: {0}")]
    UnknownExecution(Uuid),

    /// `retry_from` was asked to restart from a node not present in the
    /// base execution's workflow.
    #[error("node '{0}' not found in workflow for retry_from")]
    UnknownRetryNode(String),

    /// The execution was cancelled via `stop()` before completing.
    #[error("execution {0} was stopped")]
    Stopped(Uuid),

    /// The scheduler (C5) couldn't allocate resources for a batch within
    /// its retry budget.
    #[error("resource pool exhausted allocating batch: {0}")]
    ResourcePoolExhausted(String),
}
