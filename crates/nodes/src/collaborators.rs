//! External collaborator capabilities the node runtime consumes.
//!
//! None of these are implemented here beyond an in-memory stub: the real
//! vector store, keyword index, model-provider gateways, and identity
//! service live outside this workspace. Node implementations only ever see
//! these traits, so tests can swap in [`stub`] implementations exactly the
//! way `nodes::mock::MockNode` stands in for a real `ExecutableNode`.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// A single retrieved document, regardless of which index produced it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetrievedDocument {
    pub text: String,
    /// Similarity in `[0, 1]`, already normalised — vector search's raw
    /// distance is converted via `1 / (1 + distance)` before this type is
    /// constructed.
    pub score: f64,
    pub metadata: Value,
    pub source: DocumentSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentSource {
    Vector,
    Keyword,
}

/// Authorizes tenant/user access to a named knowledge base.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn check_kb_read(
        &self,
        tenant_id: &str,
        user_id: &str,
        kb_name: &str,
    ) -> Result<bool, String>;
}

/// Embeds text into vectors for retrieval.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(
        &self,
        texts: &[String],
        model: Option<&str>,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<Vec<f32>>, String>;
}

/// A single chat completion result.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: String,
    pub tokens_used: u64,
    pub model: String,
    pub finish_reason: String,
}

/// A streamed chat chunk.
#[derive(Debug, Clone)]
pub struct ChatChunk {
    pub content: String,
    pub done: bool,
}

/// LLM chat completions, one-shot and streamed.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(
        &self,
        message: &str,
        system_prompt: Option<&str>,
        model: Option<&str>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<ChatResponse, String>;

    /// Streamed variant. Returns the chunks eagerly collected rather than
    /// as a `Stream` — the engine's streaming path drains this and forwards
    /// `content` deltas as progress; keeping the trait object-safe avoids an
    /// associated `Stream` type.
    async fn stream_chat(
        &self,
        message: &str,
        system_prompt: Option<&str>,
        model: Option<&str>,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<ChatChunk>, String>;
}

/// Rescoring / reordering of a document list against a query.
#[async_trait]
pub trait RerankProvider: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<RetrievedDocument>,
        provider: Option<&str>,
        top_k: usize,
        tenant_id: &str,
    ) -> Result<Vec<RetrievedDocument>, String>;
}

/// Dense vector search over a tenant-scoped collection.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedDocument>, String>;

    /// Recreate the collection with a new embedding dimension. Used to
    /// self-heal a dimension mismatch in `hybrid_retriever`.
    async fn recreate(&self, collection: &str, dim: usize) -> Result<(), String>;
}

/// Sparse / keyword search over a tenant-scoped index. Optional: engines
/// may run with no keyword index configured, in which case
/// `hybrid_retriever` degrades to vector-only.
#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn search(
        &self,
        index: &str,
        query: &str,
        top_k: usize,
        filter: Option<&Value>,
    ) -> Result<Vec<RetrievedDocument>, String>;
}

/// Time source, indirected so recovery-loop backoff and circuit-breaker
/// cooldowns are deterministic under test.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now_seconds(&self) -> f64;
    async fn sleep(&self, duration: std::time::Duration);
}

/// Namespaces a knowledge-base name to a tenant-scoped collection/index
/// name. Both `VectorStore` and `KeywordIndex` callers must use this so the
/// two indices agree on naming.
pub fn tenant_scoped_name(tenant_id: &str, kb_name: &str) -> String {
    format!("tenant_{tenant_id}_{kb_name}")
}

/// Bundles every collaborator capability a node might need. Constructed
/// once per engine instance and threaded through `ExecutionContext`.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: std::sync::Arc<dyn IdentityService>,
    pub embeddings: std::sync::Arc<dyn EmbeddingProvider>,
    pub chat: std::sync::Arc<dyn ChatProvider>,
    pub rerank: std::sync::Arc<dyn RerankProvider>,
    pub vector_store: std::sync::Arc<dyn VectorStore>,
    pub keyword_index: Option<std::sync::Arc<dyn KeywordIndex>>,
    pub clock: std::sync::Arc<dyn Clock>,
}

/// Marker identifying the execution this context belongs to, kept here
/// (rather than only in `engine::models`) so collaborator implementations
/// can log / scope without depending on the `engine` crate.
pub type ExecutionId = Uuid;

pub mod stub {
    //! In-memory stand-ins for every collaborator trait, used in tests the
    //! way [`crate::mock::MockNode`] stands in for `ExecutableNode`.

    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Approves every KB read. Construct [`StubIdentityService::denying`]
    /// to test the rejection path instead.
    pub struct StubIdentityService {
        allow: bool,
    }

    impl StubIdentityService {
        pub fn allowing() -> Self {
            Self { allow: true }
        }
        pub fn denying() -> Self {
            Self { allow: false }
        }
    }

    #[async_trait]
    impl IdentityService for StubIdentityService {
        async fn check_kb_read(&self, _t: &str, _u: &str, _kb: &str) -> Result<bool, String> {
            Ok(self.allow)
        }
    }

    /// Returns a deterministic unit vector of `dim` length per input text.
    pub struct StubEmbeddingProvider {
        pub dim: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for StubEmbeddingProvider {
        async fn embed(
            &self,
            texts: &[String],
            _model: Option<&str>,
            _t: &str,
            _u: &str,
        ) -> Result<Vec<Vec<f32>>, String> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; self.dim];
                    if self.dim > 0 {
                        v[t.len() % self.dim] = 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    /// Echoes back a canned response, recording every call for assertions.
    pub struct StubChatProvider {
        pub response: String,
        pub calls: Mutex<Vec<String>>,
    }

    impl StubChatProvider {
        pub fn returning(response: impl Into<String>) -> Self {
            Self {
                response: response.into(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for StubChatProvider {
        async fn chat(
            &self,
            message: &str,
            _system_prompt: Option<&str>,
            model: Option<&str>,
            _temperature: Option<f32>,
            _max_tokens: Option<u32>,
            _t: &str,
            _u: &str,
        ) -> Result<ChatResponse, String> {
            self.calls.lock().unwrap().push(message.to_string());
            Ok(ChatResponse {
                message: self.response.clone(),
                tokens_used: self.response.split_whitespace().count() as u64,
                model: model.unwrap_or("stub-model").to_string(),
                finish_reason: "stop".to_string(),
            })
        }

        async fn stream_chat(
            &self,
            message: &str,
            system_prompt: Option<&str>,
            model: Option<&str>,
            t: &str,
            u: &str,
        ) -> Result<Vec<ChatChunk>, String> {
            let resp = self.chat(message, system_prompt, model, None, None, t, u).await?;
            Ok(vec![ChatChunk {
                content: resp.message,
                done: true,
            }])
        }
    }

    /// Sorts documents by score, descending, and truncates to `top_k`.
    pub struct StubRerankProvider;

    #[async_trait]
    impl RerankProvider for StubRerankProvider {
        async fn rerank(
            &self,
            _query: &str,
            mut documents: Vec<RetrievedDocument>,
            _provider: Option<&str>,
            top_k: usize,
            _tenant_id: &str,
        ) -> Result<Vec<RetrievedDocument>, String> {
            documents.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            documents.truncate(top_k);
            Ok(documents)
        }
    }

    /// Fixed set of documents per collection, keyed by collection name.
    pub struct StubVectorStore {
        pub collections: Mutex<std::collections::HashMap<String, Vec<RetrievedDocument>>>,
    }

    impl StubVectorStore {
        pub fn with_collection(name: impl Into<String>, docs: Vec<RetrievedDocument>) -> Self {
            let mut map = std::collections::HashMap::new();
            map.insert(name.into(), docs);
            Self {
                collections: Mutex::new(map),
            }
        }
    }

    #[async_trait]
    impl VectorStore for StubVectorStore {
        async fn search(
            &self,
            collection: &str,
            _vector: &[f32],
            top_k: usize,
        ) -> Result<Vec<RetrievedDocument>, String> {
            let map = self.collections.lock().unwrap();
            let mut docs = map.get(collection).cloned().unwrap_or_default();
            docs.truncate(top_k);
            Ok(docs)
        }

        async fn recreate(&self, collection: &str, _dim: usize) -> Result<(), String> {
            self.collections
                .lock()
                .unwrap()
                .entry(collection.to_string())
                .or_default();
            Ok(())
        }
    }

    /// Fixed set of documents per index, keyed by index name.
    pub struct StubKeywordIndex {
        pub indexes: Mutex<std::collections::HashMap<String, Vec<RetrievedDocument>>>,
    }

    impl StubKeywordIndex {
        pub fn with_index(name: impl Into<String>, docs: Vec<RetrievedDocument>) -> Self {
            let mut map = std::collections::HashMap::new();
            map.insert(name.into(), docs);
            Self {
                indexes: Mutex::new(map),
            }
        }
    }

    #[async_trait]
    impl KeywordIndex for StubKeywordIndex {
        async fn search(
            &self,
            index: &str,
            _query: &str,
            top_k: usize,
            _filter: Option<&Value>,
        ) -> Result<Vec<RetrievedDocument>, String> {
            let map = self.indexes.lock().unwrap();
            let mut docs = map.get(index).cloned().unwrap_or_default();
            docs.truncate(top_k);
            Ok(docs)
        }
    }

    /// Real wall-clock time, used outside tests; a `ManualClock` would be
    /// layered on top by callers that need deterministic backoff in tests.
    pub struct SystemClock;

    #[async_trait]
    impl Clock for SystemClock {
        fn now_seconds(&self) -> f64 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64()
        }

        async fn sleep(&self, duration: Duration) {
            tokio::time::sleep(duration).await;
        }
    }
}
