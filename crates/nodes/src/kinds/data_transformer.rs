//! `data_transformer` node — reshapes `data`.
//!
//! `json` mode (default) passes `data` through verbatim under
//! `json_output`. `extract` mode projects `config.fields` (a list of dotted
//! paths into `data`) into a flat object keyed by each path's final
//! segment.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::kinds::config_str;
use crate::{ExecutableNode, ExecutionContext, NodeError};

fn walk<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |cur, seg| cur.get(seg))
}

pub struct DataTransformerNode;

#[async_trait]
impl ExecutableNode for DataTransformerNode {
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let data = input
            .get("data")
            .cloned()
            .ok_or_else(|| NodeError::Fatal("data_transformer node: missing required input field 'data'".into()))?;

        match config_str(config, "mode").unwrap_or("json") {
            "extract" => {
                let fields = config
                    .get("fields")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();
                let mut out = Map::new();
                for field in fields {
                    if let Some(path) = field.as_str() {
                        let key = path.rsplit('.').next().unwrap_or(path).to_string();
                        out.insert(key, walk(&data, path).cloned().unwrap_or(Value::Null));
                    }
                }
                Ok(Value::Object(out))
            }
            _ => Ok(serde_json::json!({"json_output": data})),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_ctx;
    use serde_json::json;

    #[tokio::test]
    async fn json_mode_passes_data_through() {
        let node = DataTransformerNode;
        let out = node
            .execute(json!({"data": {"a": 1}}), &Value::Null, &test_ctx())
            .await
            .unwrap();
        assert_eq!(out["json_output"], json!({"a": 1}));
    }

    #[tokio::test]
    async fn extract_mode_projects_dotted_fields() {
        let node = DataTransformerNode;
        let config = json!({"mode": "extract", "fields": ["user.name", "user.age"]});
        let out = node
            .execute(
                json!({"data": {"user": {"name": "ada", "age": 30}}}),
                &config,
                &test_ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out["name"], "ada");
        assert_eq!(out["age"], 30);
    }
}
