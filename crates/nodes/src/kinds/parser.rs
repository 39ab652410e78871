//! `parser` node — structured extraction from free text.
//!
//! Two modes, selected by `config.mode` (default `"json"`):
//! - `json` — parses `text` as JSON.
//! - `extract_fields` — applies `config.fields`, a map of output key to
//!   either a regex pattern (first capture group, or whole match with no
//!   group) or a plain containment check against a literal string.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::kinds::config_str;
use crate::{ExecutableNode, ExecutionContext, NodeError};

pub struct ParserNode;

#[async_trait]
impl ExecutableNode for ParserNode {
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let text = input
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NodeError::Fatal("parser node: missing required input field 'text'".into()))?;

        match config_str(config, "mode").unwrap_or("json") {
            "extract_fields" => Ok(extract_fields(text, config)),
            _ => Ok(parse_json(text)),
        }
    }
}

fn parse_json(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(parsed) => json!({"parsed_data": parsed, "success": true}),
        Err(e) => json!({"parsed_data": Value::Null, "success": false, "error": e.to_string()}),
    }
}

fn extract_fields(text: &str, config: &Value) -> Value {
    let fields = match config.get("fields").and_then(|v| v.as_object()) {
        Some(f) => f,
        None => {
            return json!({
                "parsed_data": Value::Null,
                "success": false,
                "error": "parser node: config.fields is required in extract_fields mode",
            })
        }
    };

    let mut out = Map::new();
    for (key, spec) in fields {
        let pattern = spec.as_str().unwrap_or_default();
        let value = match Regex::new(pattern) {
            Ok(re) => match re.captures(text) {
                Some(caps) => caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| Value::String(m.as_str().to_string()))
                    .unwrap_or(Value::Null),
                None => Value::Bool(false),
            },
            // Not a valid regex: fall back to a plain containment check.
            Err(_) => Value::Bool(text.contains(pattern)),
        };
        out.insert(key.clone(), value);
    }

    json!({"parsed_data": Value::Object(out), "success": true})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_ctx;

    #[tokio::test]
    async fn parses_valid_json() {
        let node = ParserNode;
        let out = node
            .execute(json!({"text": "{\"a\": 1}"}), &Value::Null, &test_ctx())
            .await
            .unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["parsed_data"]["a"], 1);
    }

    #[tokio::test]
    async fn invalid_json_reports_failure_without_erroring() {
        let node = ParserNode;
        let out = node
            .execute(json!({"text": "not json"}), &Value::Null, &test_ctx())
            .await
            .unwrap();
        assert_eq!(out["success"], false);
    }

    #[tokio::test]
    async fn extracts_fields_with_regex_capture_group() {
        let node = ParserNode;
        let config = json!({"mode": "extract_fields", "fields": {"id": "id=(\\d+)"}});
        let out = node
            .execute(json!({"text": "order id=42 shipped"}), &config, &test_ctx())
            .await
            .unwrap();
        assert_eq!(out["parsed_data"]["id"], "42");
    }
}
