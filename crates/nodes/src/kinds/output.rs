//! `output` node — terminal node that shapes the final payload.
//!
//! Precedence: `config.select_path` (when no template is set) beats a
//! `config.template` render, which beats plain passthrough. An empty
//! rendered template (e.g. every referenced path was missing) falls back
//! to the raw payload rather than returning `""`.

use async_trait::async_trait;
use serde_json::Value;

use crate::kinds::config_str;
use crate::template::{self, Namespaces};
use crate::{ExecutableNode, ExecutionContext, NodeError};

pub struct OutputNode;

#[async_trait]
impl ExecutableNode for OutputNode {
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let template_str = config_str(config, "template");

        if template_str.is_none() {
            if let Some(path) = config_str(config, "select_path") {
                let ns = Namespaces {
                    data: &input,
                    input: &ctx.input,
                    context: &ctx.global_context,
                };
                if let Some(found) = template::resolve(path, ns) {
                    return Ok(result_of(found.clone()));
                }
                return Ok(result_of(input));
            }
        }

        if let Some(tmpl) = template_str {
            let ns = Namespaces {
                data: &input,
                input: &ctx.input,
                context: &ctx.global_context,
            };
            let rendered = template::render(tmpl, ns);
            if rendered.is_empty() {
                return Ok(result_of(input));
            }
            return Ok(result_of(Value::String(rendered)));
        }

        Ok(result_of(input))
    }
}

fn result_of(value: Value) -> Value {
    serde_json::json!({ "result": value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_ctx;
    use serde_json::json;

    #[tokio::test]
    async fn passes_through_when_no_config() {
        let node = OutputNode;
        let out = node
            .execute(json!({"a": 1}), &Value::Null, &test_ctx())
            .await
            .unwrap();
        assert_eq!(out["result"], json!({"a": 1}));
    }

    #[tokio::test]
    async fn renders_template_over_payload() {
        let node = OutputNode;
        let config = json!({"template": "{{content}}"});
        let out = node
            .execute(json!({"content": "pong"}), &config, &test_ctx())
            .await
            .unwrap();
        assert_eq!(out["result"], "pong");
    }

    #[tokio::test]
    async fn empty_rendered_template_falls_back_to_raw_payload() {
        let node = OutputNode;
        let config = json!({"template": "{{missing}}"});
        let out = node
            .execute(json!({"content": "pong"}), &config, &test_ctx())
            .await
            .unwrap();
        assert_eq!(out["result"], json!({"content": "pong"}));
    }

    #[tokio::test]
    async fn select_path_picks_nested_value() {
        let node = OutputNode;
        let config = json!({"select_path": "data.documents[0]"});
        let out = node
            .execute(json!({"documents": ["first"]}), &config, &test_ctx())
            .await
            .unwrap();
        assert_eq!(out["result"], "first");
    }
}
