//! `rag_retriever`, `hybrid_retriever`, and the `retriever` dispatcher.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::collaborators::{tenant_scoped_name, DocumentSource, RetrievedDocument};
use crate::kinds::{config_str, config_usize};
use crate::{ExecutableNode, ExecutionContext, NodeError};

fn query_of(input: &Value) -> Result<String, NodeError> {
    input
        .get("query")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| NodeError::Fatal("retriever node: missing required input field 'query'".into()))
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

async fn embed_and_search(
    ctx: &ExecutionContext,
    kb: &str,
    query: &str,
    top_k: usize,
) -> Result<Vec<RetrievedDocument>, NodeError> {
    let allowed = ctx
        .collaborators
        .identity
        .check_kb_read(&ctx.tenant_id, &ctx.user_id, kb)
        .await
        .map_err(|e| NodeError::Classified {
            kind: crate::ErrorKind::Permission,
            message: format!("kb access check failed: {e}"),
        })?;
    if !allowed {
        return Err(NodeError::Classified {
            kind: crate::ErrorKind::Permission,
            message: format!("tenant '{}' user '{}' may not read kb '{kb}'", ctx.tenant_id, ctx.user_id),
        });
    }

    let collection = tenant_scoped_name(&ctx.tenant_id, kb);

    let embeddings = ctx
        .collaborators
        .embeddings
        .embed(&[query.to_string()], None, &ctx.tenant_id, &ctx.user_id)
        .await
        .map_err(|e| NodeError::Retryable(format!("embedding call failed: {e}")))?;
    let vector = embeddings
        .into_iter()
        .next()
        .ok_or_else(|| NodeError::Fatal("embedding provider returned no vectors".into()))?;

    let search = ctx.collaborators.vector_store.search(&collection, &vector, top_k).await;
    let docs = match search {
        Ok(docs) => docs,
        Err(e) if e.to_ascii_lowercase().contains("dimension") => {
            // Self-heal a dimension mismatch: recreate the collection and
            // retry exactly once.
            ctx.collaborators
                .vector_store
                .recreate(&collection, vector.len())
                .await
                .map_err(|e| NodeError::Retryable(format!("collection recreate failed: {e}")))?;
            ctx.collaborators
                .vector_store
                .search(&collection, &vector, top_k)
                .await
                .map_err(|e| NodeError::Retryable(format!("vector search failed after recreate: {e}")))?
        }
        Err(e) => return Err(NodeError::Retryable(format!("vector search failed: {e}"))),
    };

    Ok(docs
        .into_iter()
        .map(|mut d| {
            d.source = DocumentSource::Vector;
            d
        })
        .collect())
}

pub struct RagRetrieverNode;

#[async_trait]
impl ExecutableNode for RagRetrieverNode {
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let query = query_of(&input)?;
        let kb = config_str(config, "kb").unwrap_or("default");
        let top_k = config_usize(config, "top_k", 5);

        let docs = embed_and_search(ctx, kb, &query, top_k).await?;

        Ok(json!({
            "documents": documents_to_json(&docs),
            "query": query,
            "total_results": docs.len(),
        }))
    }
}

pub struct HybridRetrieverNode;

#[async_trait]
impl ExecutableNode for HybridRetrieverNode {
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let query = query_of(&input)?;
        let kb = config_str(config, "kb").unwrap_or("default");
        let top_k = config_usize(config, "top_k", 5);

        let vector_fut = embed_and_search(ctx, kb, &query, top_k);

        let keyword_fut = async {
            match &ctx.collaborators.keyword_index {
                None => Ok(Vec::new()),
                Some(idx) => {
                    let index_name = tenant_scoped_name(&ctx.tenant_id, kb);
                    idx.search(&index_name, &query, top_k, None)
                        .await
                        .map(|docs| {
                            docs.into_iter()
                                .map(|mut d| {
                                    d.source = DocumentSource::Keyword;
                                    d
                                })
                                .collect::<Vec<_>>()
                        })
                        .map_err(|e| NodeError::Retryable(format!("keyword search failed: {e}")))
                }
            }
        };

        let (vector_docs, keyword_docs) = tokio::join!(vector_fut, keyword_fut);
        let vector_docs = vector_docs?;
        let keyword_docs = keyword_docs?;

        // Vector-ranked docs come first; keyword-only docs (not already
        // present by text) are appended, each tagged with its own source.
        let mut merged = vector_docs;
        let seen: std::collections::HashSet<&str> =
            merged.iter().map(|d| d.text.as_str()).collect();
        for doc in keyword_docs {
            if !seen.contains(doc.text.as_str()) {
                merged.push(doc);
            }
        }

        Ok(json!({
            "documents": documents_to_json(&merged),
            "query": query,
            "total_results": merged.len(),
        }))
    }
}

pub struct DispatchRetrieverNode;

#[async_trait]
impl ExecutableNode for DispatchRetrieverNode {
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        match config_str(config, "mode").unwrap_or("vector") {
            "keyword" => {
                let query = query_of(&input)?;
                let kb = config_str(config, "kb").unwrap_or("default");
                let top_k = config_usize(config, "top_k", 5);
                let index_name = tenant_scoped_name(&ctx.tenant_id, kb);
                let docs = match &ctx.collaborators.keyword_index {
                    None => Vec::new(),
                    Some(idx) => idx
                        .search(&index_name, &query, top_k, None)
                        .await
                        .map(|docs| {
                            docs.into_iter()
                                .map(|mut d| {
                                    d.source = DocumentSource::Keyword;
                                    d
                                })
                                .collect::<Vec<_>>()
                        })
                        .map_err(|e| NodeError::Retryable(format!("keyword search failed: {e}")))?,
                };
                Ok(json!({
                    "documents": documents_to_json(&docs),
                    "query": query,
                    "total_results": docs.len(),
                }))
            }
            "hybrid" => HybridRetrieverNode.execute(input, config, ctx).await,
            _ => RagRetrieverNode.execute(input, config, ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::stub::{StubKeywordIndex, StubVectorStore};
    use crate::collaborators::Collaborators;
    use crate::test_support::test_ctx_with;
    use std::sync::Arc;

    fn doc(text: &str, score: f64) -> RetrievedDocument {
        RetrievedDocument {
            text: text.into(),
            score,
            metadata: Value::Null,
            source: DocumentSource::Vector,
        }
    }

    #[tokio::test]
    async fn hybrid_merges_vector_first_then_unique_keyword_docs() {
        use crate::collaborators::stub::*;

        let collection = tenant_scoped_name("t1", "kb1");
        let vector_store = StubVectorStore::with_collection(
            collection.clone(),
            vec![doc("alpha", 0.9), doc("beta", 0.8)],
        );
        let keyword_index =
            StubKeywordIndex::with_index(collection, vec![doc("beta", 0.5), doc("gamma", 0.4)]);

        let ctx = test_ctx_with(Collaborators {
            identity: Arc::new(StubIdentityService::allowing()),
            embeddings: Arc::new(StubEmbeddingProvider { dim: 4 }),
            chat: Arc::new(StubChatProvider::returning("n/a")),
            rerank: Arc::new(StubRerankProvider),
            vector_store: Arc::new(vector_store),
            keyword_index: Some(Arc::new(keyword_index)),
            clock: Arc::new(SystemClock),
        });

        let config = json!({"kb": "kb1", "top_k": 2});
        let out = HybridRetrieverNode
            .execute(json!({"query": "q"}), &config, &ctx)
            .await
            .unwrap();

        assert_eq!(out["total_results"], 3);
        assert_eq!(out["documents"][0]["source"], "vector");
        assert_eq!(out["documents"][2]["text"], "gamma");
    }

    #[tokio::test]
    async fn identity_rejection_surfaces_as_permission_error() {
        use crate::collaborators::stub::*;

        let ctx = test_ctx_with(Collaborators {
            identity: Arc::new(StubIdentityService::denying()),
            embeddings: Arc::new(StubEmbeddingProvider { dim: 4 }),
            chat: Arc::new(StubChatProvider::returning("n/a")),
            rerank: Arc::new(StubRerankProvider),
            vector_store: Arc::new(StubVectorStore::with_collection("x", vec![])),
            keyword_index: None,
            clock: Arc::new(SystemClock),
        });

        let err = RagRetrieverNode
            .execute(json!({"query": "q"}), &json!({"kb": "kb1"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Permission);
    }
}
