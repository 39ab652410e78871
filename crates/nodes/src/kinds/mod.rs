//! Built-in `ExecutableNode` implementations — one module per tag in the
//! closed node-type set.

pub mod classifier;
pub mod code_executor;
pub mod condition;
pub mod data_transformer;
pub mod embeddings;
pub mod http_request;
pub mod input;
pub mod llm;
pub mod output;
pub mod parser;
pub mod reranker;
pub mod retriever;

/// Read a string field out of a node's config object, if present.
pub(crate) fn config_str<'a>(config: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    config.get(key).and_then(|v| v.as_str())
}

/// Read a `usize` field out of a node's config object, falling back to
/// `default` when absent or not a positive integer.
pub(crate) fn config_usize(config: &serde_json::Value, key: &str, default: usize) -> usize {
    config
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

/// Read a field out of `input`, falling back to the whole input object's
/// top level when the field itself is missing.
pub(crate) fn input_field<'a>(input: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
    input.get(key)
}
