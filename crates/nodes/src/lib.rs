//! `nodes` crate — the `ExecutableNode` trait, the closed node-type
//! registry, and the collaborator capabilities nodes are built against.
//!
//! Every node — built-in and future plugin alike — must implement
//! [`ExecutableNode`]. The engine crate dispatches execution through this
//! trait object and never depends on a concrete node type.

pub mod collaborators;
pub mod error;
pub mod kinds;
pub mod mock;
pub mod template;
pub mod traits;

#[cfg(test)]
pub mod test_support;

pub use error::{ErrorKind, NodeError};
pub use traits::{ExecutableNode, ExecutionContext};

/// Build the registry of built-in node implementations, keyed by the
/// `node_type` tag used in `NodeDefinition`. Engines needing a custom node
/// type register it the same way before constructing the executor.
pub fn builtin_registry() -> std::collections::HashMap<String, std::sync::Arc<dyn ExecutableNode>>
{
    use std::sync::Arc;

    let mut registry: std::collections::HashMap<String, Arc<dyn ExecutableNode>> =
        std::collections::HashMap::new();

    registry.insert("input".into(), Arc::new(kinds::input::InputNode));
    registry.insert("output".into(), Arc::new(kinds::output::OutputNode));
    registry.insert("llm".into(), Arc::new(kinds::llm::LlmNode));
    registry.insert(
        "rag_retriever".into(),
        Arc::new(kinds::retriever::RagRetrieverNode),
    );
    registry.insert(
        "hybrid_retriever".into(),
        Arc::new(kinds::retriever::HybridRetrieverNode),
    );
    registry.insert(
        "retriever".into(),
        Arc::new(kinds::retriever::DispatchRetrieverNode),
    );
    registry.insert("reranker".into(), Arc::new(kinds::reranker::RerankerNode));
    registry.insert(
        "classifier".into(),
        Arc::new(kinds::classifier::ClassifierNode),
    );
    registry.insert("parser".into(), Arc::new(kinds::parser::ParserNode));
    registry.insert(
        "condition".into(),
        Arc::new(kinds::condition::ConditionNode),
    );
    registry.insert(
        "data_transformer".into(),
        Arc::new(kinds::data_transformer::DataTransformerNode),
    );
    registry.insert(
        "embeddings".into(),
        Arc::new(kinds::embeddings::EmbeddingsNode),
    );
    registry.insert(
        "http_request".into(),
        Arc::new(kinds::http_request::HttpRequestNode),
    );
    registry.insert(
        "code_executor".into(),
        Arc::new(kinds::code_executor::CodeExecutorNode),
    );

    registry
}
