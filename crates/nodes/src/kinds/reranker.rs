//! `reranker` node — rescores a document list against the query.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::collaborators::{DocumentSource, RetrievedDocument};
use crate::kinds::config_usize;
use crate::{ExecutableNode, ExecutionContext, NodeError};

fn documents_of(input: &Value) -> Result<Vec<RetrievedDocument>, NodeError> {
    let arr = input
        .get("documents")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            NodeError::Fatal("reranker node: missing required input field 'documents'".into())
        })?;

    arr.iter()
        .map(|d| {
            let text = d
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| NodeError::Fatal("reranker node: document missing 'text'".into()))?
                .to_string();
            let score = d.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let metadata = d.get("metadata").cloned().unwrap_or(Value::Null);
            let source = match d.get("source").and_then(|v| v.as_str()) {
                Some("keyword") => DocumentSource::Keyword,
                _ => DocumentSource::Vector,
            };
            Ok(RetrievedDocument {
                text,
                score,
                metadata,
                source,
            })
        })
        .collect()
}

fn documents_to_json(docs: &[RetrievedDocument]) -> Value {
    Value::Array(
        docs.iter()
            .map(|d| {
                json!({
                    "text": d.text,
                    "score": d.score,
                    "metadata": d.metadata,
                    "source": match d.source {
                        DocumentSource::Vector => "vector",
                        DocumentSource::Keyword => "keyword",
                    }
                })
            })
            .collect(),
    )
}

pub struct RerankerNode;

#[async_trait]
impl ExecutableNode for RerankerNode {
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let query = input
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NodeError::Fatal("reranker node: missing required input field 'query'".into()))?;
        let documents = documents_of(&input)?;
        let top_k = config_usize(config, "top_k", documents.len());
        let provider = crate::kinds::config_str(config, "provider");

        let reranked = ctx
            .collaborators
            .rerank
            .rerank(query, documents, provider, top_k, &ctx.tenant_id)
            .await
            .map_err(|e| NodeError::Retryable(format!("rerank call failed: {e}")))?;

        Ok(json!({
            "documents": documents_to_json(&reranked),
            "total_results": reranked.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_ctx;

    #[tokio::test]
    async fn reorders_by_score_and_truncates() {
        let node = RerankerNode;
        let input = json!({
            "query": "q",
            "documents": [
                {"text": "low", "score": 0.1},
                {"text": "high", "score": 0.9},
                {"text": "mid", "score": 0.5},
            ]
        });
        let config = json!({"top_k": 2});
        let out = node.execute(input, &config, &test_ctx()).await.unwrap();
        assert_eq!(out["total_results"], 2);
        assert_eq!(out["documents"][0]["text"], "high");
        assert_eq!(out["documents"][1]["text"], "mid");
    }

    #[tokio::test]
    async fn missing_documents_is_fatal() {
        let node = RerankerNode;
        let err = node
            .execute(json!({"query": "q"}), &Value::Null, &test_ctx())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
