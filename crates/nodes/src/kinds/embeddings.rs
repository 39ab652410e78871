//! `embeddings` node — one-shot text embedding via the provider.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::kinds::config_str;
use crate::{ExecutableNode, ExecutionContext, NodeError};

pub struct EmbeddingsNode;

#[async_trait]
impl ExecutableNode for EmbeddingsNode {
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let text = input
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NodeError::Fatal("embeddings node: missing required input field 'text'".into()))?;

        let model = config_str(config, "model");
        let vectors = ctx
            .collaborators
            .embeddings
            .embed(&[text.to_string()], model, &ctx.tenant_id, &ctx.user_id)
            .await
            .map_err(|e| NodeError::Retryable(format!("embedding call failed: {e}")))?;

        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| NodeError::Fatal("embedding provider returned no vectors".into()))?;

        Ok(json!({
            "embedding": vector.clone(),
            "dimensions": vector.len(),
            "model": model.unwrap_or("default"),
            "text": text,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_ctx;

    #[tokio::test]
    async fn returns_vector_and_dimensions() {
        let node = EmbeddingsNode;
        let out = node
            .execute(json!({"text": "hello"}), &Value::Null, &test_ctx())
            .await
            .unwrap();
        assert_eq!(out["dimensions"], 4);
        assert!(out["embedding"].is_array());
    }
}
