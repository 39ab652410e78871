//! `condition` node — branch gate for downstream edge conditions.
//!
//! The value under test is `input.value` when present, else
//! `input.data[config.field_path]` (dotted path into `data`). Falls back to
//! truthiness when `config.condition_type` names none of the comparison
//! operators. `data` passes through unchanged so sibling branches can keep
//! consuming the same payload.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::kinds::config_str;
use crate::{ExecutableNode, ExecutionContext, NodeError};

fn walk_field_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |cur, seg| cur.get(seg))
}

fn evaluated_value(input: &Value, config: &Value) -> Value {
    if let Some(v) = input.get("value") {
        return v.clone();
    }
    if let (Some(data), Some(path)) = (input.get("data"), config_str(config, "field_path")) {
        if let Some(v) = walk_field_path(data, path) {
            return v.clone();
        }
    }
    Value::Null
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn evaluate(condition_type: &str, value: &Value, target: &Value) -> bool {
    match condition_type {
        "equals" => value == target,
        "contains" => match (value, target) {
            (Value::String(s), Value::String(t)) => s.contains(t.as_str()),
            (Value::Array(a), t) => a.contains(t),
            _ => false,
        },
        "greater_than" => match (as_f64(value), as_f64(target)) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        "less_than" => match (as_f64(value), as_f64(target)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        _ => is_truthy(value),
    }
}

pub struct ConditionNode;

#[async_trait]
impl ExecutableNode for ConditionNode {
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let condition_type = config_str(config, "condition_type").unwrap_or("truthy");
        let condition_value = config.get("condition_value").cloned().unwrap_or(Value::Null);
        let value = evaluated_value(&input, config);

        let result = evaluate(condition_type, &value, &condition_value);

        Ok(json!({
            "condition_result": result,
            "evaluated_value": value,
            "condition_type": condition_type,
            "condition_value": condition_value,
            "data": input.get("data").cloned().unwrap_or(Value::Null),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_ctx;

    #[tokio::test]
    async fn equals_compares_the_explicit_value() {
        let node = ConditionNode;
        let config = json!({"condition_type": "equals", "condition_value": "done"});
        let out = node
            .execute(json!({"value": "done"}), &config, &test_ctx())
            .await
            .unwrap();
        assert_eq!(out["condition_result"], true);
    }

    #[tokio::test]
    async fn falls_back_to_field_path_into_data() {
        let node = ConditionNode;
        let config = json!({"condition_type": "greater_than", "condition_value": 10, "field_path": "score"});
        let out = node
            .execute(json!({"data": {"score": 42}}), &config, &test_ctx())
            .await
            .unwrap();
        assert_eq!(out["condition_result"], true);
        assert_eq!(out["data"]["score"], 42);
    }

    #[tokio::test]
    async fn unknown_condition_type_falls_back_to_truthiness() {
        let node = ConditionNode;
        let out = node
            .execute(json!({"value": ""}), &Value::Null, &test_ctx())
            .await
            .unwrap();
        assert_eq!(out["condition_result"], false);
    }
}
