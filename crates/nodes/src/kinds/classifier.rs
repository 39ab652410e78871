//! `classifier` node — label assignment via an LLM prompt.
//!
//! Prompts the chat provider with the input text and the candidate label
//! set, then heuristically scores confidence from how cleanly the response
//! matched one label: an exact (case-insensitive) match to a single
//! candidate is full confidence; a response merely containing one
//! candidate name is partial; anything else falls back to the first
//! candidate at zero confidence rather than failing the node.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::kinds::config_str;
use crate::{ExecutableNode, ExecutionContext, NodeError};

fn candidates_of(config: &Value) -> Vec<String> {
    config
        .get("classes")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub struct ClassifierNode;

#[async_trait]
impl ExecutableNode for ClassifierNode {
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let text = input
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NodeError::Fatal("classifier node: missing required input field 'text'".into()))?;

        let classes = candidates_of(config);
        if classes.is_empty() {
            return Err(NodeError::Fatal(
                "classifier node: config.classes must be a non-empty list".into(),
            ));
        }

        let prompt = format!(
            "Classify the following text into exactly one of these labels: {}.\nRespond with only the label.\n\nText: {text}",
            classes.join(", ")
        );

        let response = ctx
            .collaborators
            .chat
            .chat(
                &prompt,
                None,
                config_str(config, "model"),
                Some(0.0),
                None,
                &ctx.tenant_id,
                &ctx.user_id,
            )
            .await
            .map_err(|e| NodeError::Classified {
                kind: crate::error::classify(&e),
                message: format!("classifier llm call failed: {e}"),
            })?;

        let raw = response.message.trim();
        let lowered = raw.to_ascii_lowercase();

        let exact = classes.iter().find(|c| c.to_ascii_lowercase() == lowered);
        let (class, confidence) = if let Some(c) = exact {
            (c.clone(), 1.0)
        } else if let Some(c) = classes.iter().find(|c| lowered.contains(&c.to_ascii_lowercase())) {
            (c.clone(), 0.5)
        } else {
            (classes[0].clone(), 0.0)
        };

        Ok(json!({
            "class": class,
            "confidence": confidence,
            "all_classes": classes,
            "raw_response": raw,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{stub::StubChatProvider, Collaborators};
    use crate::test_support::test_ctx_with;
    use std::sync::Arc;

    #[tokio::test]
    async fn exact_match_is_full_confidence() {
        use crate::collaborators::stub::*;
        let ctx = test_ctx_with(Collaborators {
            identity: Arc::new(StubIdentityService::allowing()),
            embeddings: Arc::new(StubEmbeddingProvider { dim: 4 }),
            chat: Arc::new(StubChatProvider::returning("spam")),
            rerank: Arc::new(StubRerankProvider),
            vector_store: Arc::new(StubVectorStore::with_collection("c", vec![])),
            keyword_index: None,
            clock: Arc::new(SystemClock),
        });
        let config = json!({"classes": ["spam", "ham"]});
        let out = ClassifierNode
            .execute(json!({"text": "buy now!!!"}), &config, &ctx)
            .await
            .unwrap();
        assert_eq!(out["class"], "spam");
        assert_eq!(out["confidence"], 1.0);
    }

    #[tokio::test]
    async fn empty_class_list_is_fatal() {
        let ctx = test_ctx_with(Collaborators {
            chat: Arc::new(StubChatProvider::returning("spam")),
            ..base_collaborators()
        });
        let err = ClassifierNode
            .execute(json!({"text": "x"}), &Value::Null, &ctx)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
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
}
