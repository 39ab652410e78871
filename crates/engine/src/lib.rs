//! `engine` crate — workflow graph model, validation, input resolution,
//! node runtime dispatch, error recovery, scheduling, metrics, and the
//! execution driver that ties them together.

pub mod config;
pub mod dag;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod models;
pub mod recovery;
pub mod resolver;
pub mod retry_from;
pub mod runner;
pub mod scheduler;
pub mod validator;

pub use config::EngineConfig;
pub use dag::validate_dag;
pub use driver::{Driver, ExecutionOptions, ExecutionPersistence};
pub use error::EngineError;
pub use models::{
    Edge, ExecutionContext, ExecutionStatus, ExecutionStep, Node, NodeSignature, PortSpec,
    StepStatus, ValueType, WorkflowDefinition,
};
pub use retry_from::{retry_from, RetryOptions};
pub use validator::{validate, ValidationIssue, ValidationReport};
