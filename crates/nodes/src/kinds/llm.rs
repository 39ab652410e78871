//! `llm` node — a single chat-completion call.
//!
//! `prompt` is required; `config.prompt_key` optionally redirects which
//! input field supplies it. Both the system and user prompt strings are
//! template-rendered before the call. Provider failures surface as
//! `NodeError::Classified(ErrorKind::Execution, ...)` so the recovery
//! layer's default `llm`-agnostic policy picks them up as ordinary
//! execution errors (the provider is responsible for raising a
//! `network`/`timeout`-flavoured message where that distinction matters).

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::kinds::config_str;
use crate::template::{self, Namespaces};
use crate::{ExecutableNode, ExecutionContext, NodeError};

pub struct LlmNode;

#[async_trait]
impl ExecutableNode for LlmNode {
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let prompt_key = config_str(config, "prompt_key").unwrap_or("prompt");
        let raw_prompt = input
            .get(prompt_key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                NodeError::Fatal(format!("llm node: missing required input field '{prompt_key}'"))
            })?;

        let ns = Namespaces {
            data: &input,
            input: &ctx.input,
            context: &ctx.global_context,
        };
        let prompt = template::render(raw_prompt, ns);

        let system_prompt = input
            .get("system_prompt")
            .and_then(|v| v.as_str())
            .map(|s| template::render(s, ns));

        let model = config_str(config, "model");
        let temperature = config.get("temperature").and_then(|v| v.as_f64()).map(|v| v as f32);
        let max_tokens = config.get("max_tokens").and_then(|v| v.as_u64()).map(|v| v as u32);

        let response = ctx
            .collaborators
            .chat
            .chat(
                &prompt,
                system_prompt.as_deref(),
                model,
                temperature,
                max_tokens,
                &ctx.tenant_id,
                &ctx.user_id,
            )
            .await
            .map_err(|e| NodeError::Classified {
                kind: nodes_error_kind(&e),
                message: format!("llm call failed: {e}"),
            })?;

        Ok(json!({
            "content": response.message,
            "metadata": {
                "tokens_used": response.tokens_used,
                "model": response.model,
                "finish_reason": response.finish_reason,
            }
        }))
    }
}

fn nodes_error_kind(message: &str) -> crate::ErrorKind {
    crate::error::classify(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{stub::StubChatProvider, Collaborators};
    use crate::test_support::test_ctx_with;
    use std::sync::Arc;

    fn chat_ctx(response: &str) -> ExecutionContext {
        let base = test_ctx_with(Collaborators {
            chat: Arc::new(StubChatProvider::returning(response)),
            ..base_collaborators()
        });
        base
    }

    fn base_collaborators() -> Collaborators {
        use crate::collaborators::stub::*;
        Collaborators {
            identity: Arc::new(StubIdentityService::allowing()),
            embeddings: Arc::new(StubEmbeddingProvider { dim: 4 }),
            chat: Arc::new(StubChatProvider::returning("ok")),
            rerank: Arc::new(StubRerankProvider),
            vector_store: Arc::new(StubVectorStore::with_collection("c", vec![])),
            keyword_index: None,
            clock: Arc::new(SystemClock),
        }
    }

    #[tokio::test]
    async fn linear_llm_renders_prompt_and_returns_content() {
        let node = LlmNode;
        let ctx = chat_ctx("pong");
        let config = json!({"prompt_key": "q"});
        let out = node
            .execute(json!({"q": "ping"}), &config, &ctx)
            .await
            .unwrap();
        assert_eq!(out["content"], "pong");
    }

    #[tokio::test]
    async fn missing_prompt_field_is_fatal() {
        let node = LlmNode;
        let ctx = chat_ctx("pong");
        let err = node.execute(json!({}), &Value::Null, &ctx).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
