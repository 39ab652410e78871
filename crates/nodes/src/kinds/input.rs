//! `input` node — the workflow's entry point.
//!
//! Flattens the caller-supplied engine payload and fills the string
//! aliases (`data`, `input`, `prompt`, `query`, `text`) downstream string
//! edges commonly key off of, so a workflow author doesn't have to wire an
//! explicit `source_output` for every consumer. Never produces a `null` —
//! missing string fields default to `""`, a missing `data` object defaults
//! to `{}`.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::{ExecutableNode, ExecutionContext, NodeError};

pub struct InputNode;

#[async_trait]
impl ExecutableNode for InputNode {
    async fn execute(
        &self,
        input: Value,
        _config: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let data = if input.is_object() {
            input.clone()
        } else {
            json!({})
        };

        let string_of = |key: &str| -> String {
            data.get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_default()
        };

        let mut out = Map::new();
        out.insert("data".into(), data.clone());
        out.insert("input".into(), data.clone());
        out.insert("prompt".into(), Value::String(string_of("prompt")));
        out.insert("query".into(), Value::String(string_of("query")));
        out.insert("text".into(), Value::String(string_of("text")));

        // Fold through the caller's own top-level fields too, so a
        // downstream edge keyed directly on e.g. `question` still works.
        if let Some(obj) = data.as_object() {
            for (k, v) in obj {
                out.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }

        Ok(Value::Object(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_ctx;

    #[tokio::test]
    async fn fills_string_aliases_from_caller_payload() {
        let node = InputNode;
        let out = node
            .execute(json!({"query": "hi"}), &Value::Null, &test_ctx())
            .await
            .unwrap();
        assert_eq!(out["query"], "hi");
        assert_eq!(out["prompt"], "");
        assert_eq!(out["text"], "");
    }

    #[tokio::test]
    async fn never_nulls_on_non_object_input() {
        let node = InputNode;
        let out = node
            .execute(Value::Null, &Value::Null, &test_ctx())
            .await
            .unwrap();
        assert_eq!(out["data"], json!({}));
        assert_eq!(out["prompt"], "");
    }
}
