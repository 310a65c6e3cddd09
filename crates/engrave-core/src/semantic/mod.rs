//! Optional semantic-similarity capability.
//!
//! An [`Embedder`] turns text into a vector and a [`VectorIndex`] answers
//! nearest-neighbour queries over record vectors. The engine holds a
//! [`SemanticProvider`], which is either absent or a pair of the two.

mod index;

pub use index::{cosine_similarity, InMemoryVectorIndex, VectorIndex};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngraveError, EngraveResult};
use crate::types::RecordId;

/// Text embedding capability. All embedding backends implement this.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate the embedding for one text.
    async fn embed(&self, text: &str) -> EngraveResult<Vec<f32>>;

    /// Generate embeddings for several texts.
    async fn embed_batch(&self, texts: &[String]) -> EngraveResult<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Length of the vectors this embedder produces.
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Embedder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// Model name/identifier.
    pub model: String,
    #[serde(default = "default_embedding_dims")]
    pub embedding_dims: usize,
    /// API key (if not using environment variable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_embedding_dims() -> usize {
    768
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            embedding_dims: default_embedding_dims(),
            api_key: None,
            base_url: None,
        }
    }
}

/// Embedding backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderProvider {
    #[default]
    Ollama,
    OpenAI,
}

/// The semantic-similarity collaborator, chosen at construction.
#[derive(Clone, Default)]
pub enum SemanticProvider {
    /// No semantic signal; retrieval is keyword-only.
    #[default]
    Absent,
    Embedding {
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    },
}

impl std::fmt::Debug for SemanticProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SemanticProvider::Absent => write!(f, "SemanticProvider::Absent"),
            SemanticProvider::Embedding { embedder, .. } => f
                .debug_struct("SemanticProvider::Embedding")
                .field("model", &embedder.model_name())
                .field("dimension", &embedder.dimension())
                .finish(),
        }
    }
}

impl SemanticProvider {
    /// Pair an embedder with an in-memory index.
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Self {
        SemanticProvider::Embedding {
            embedder,
            index: Arc::new(InMemoryVectorIndex::new()),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, SemanticProvider::Absent)
    }

    /// Embed and index a record's content. No-op when absent.
    pub async fn index(&self, id: RecordId, content: &str) -> EngraveResult<()> {
        match self {
            SemanticProvider::Absent => Ok(()),
            SemanticProvider::Embedding { embedder, index } => {
                let vector = embedder.embed(content).await.map_err(as_provider_error)?;
                check_dimension(embedder.as_ref(), &vector)?;
                index.upsert(id, vector).await.map_err(as_provider_error)
            }
        }
    }

    /// Nearest records to `query` as `(id, similarity)`. Empty when absent.
    pub async fn search(&self, query: &str, limit: usize) -> EngraveResult<Vec<(RecordId, f64)>> {
        match self {
            SemanticProvider::Absent => Ok(Vec::new()),
            SemanticProvider::Embedding { embedder, index } => {
                let vector = embedder.embed(query).await.map_err(as_provider_error)?;
                let hits = index.nearest(&vector, limit).await.map_err(as_provider_error)?;
                debug!(query_len = query.len(), hits = hits.len(), "Semantic search");
                Ok(hits)
            }
        }
    }

    /// Drop a record from the index. No-op when absent.
    pub async fn remove(&self, id: RecordId) -> EngraveResult<()> {
        match self {
            SemanticProvider::Absent => Ok(()),
            SemanticProvider::Embedding { index, .. } => {
                index.remove(id).await.map_err(as_provider_error)
            }
        }
    }
}

fn check_dimension(embedder: &dyn Embedder, vector: &[f32]) -> EngraveResult<()> {
    if vector.len() != embedder.dimension() {
        return Err(EngraveError::provider(format!(
            "{} returned {} dimensions, expected {}",
            embedder.model_name(),
            vector.len(),
            embedder.dimension()
        )));
    }
    Ok(())
}

/// Any failure inside the provider is reported as `ProviderUnavailable`.
fn as_provider_error(err: EngraveError) -> EngraveError {
    match err {
        EngraveError::ProviderUnavailable { .. } => err,
        other => EngraveError::provider(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    struct FixedEmbedder {
        dims: usize,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, text: &str) -> EngraveResult<Vec<f32>> {
            if text.is_empty() {
                return Err(EngraveError::Internal("empty".into()));
            }
            let mut v = vec![0.0; self.dims];
            v[text.len() % self.dims] = 1.0;
            Ok(v)
        }

        fn dimension(&self) -> usize {
            self.dims
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_absent_provider_is_empty() {
        let provider = SemanticProvider::Absent;
        assert!(provider.is_absent());
        provider.index(uuid::Uuid::new_v4(), "text").await.unwrap();
        assert!(provider.search("text", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_index_and_search() {
        let provider = SemanticProvider::in_memory(Arc::new(FixedEmbedder { dims: 4 }));
        let a = uuid::Uuid::new_v4();
        let b = uuid::Uuid::new_v4();
        provider.index(a, "abc").await.unwrap();
        provider.index(b, "ab").await.unwrap();

        let hits = provider.search("xyz", 5).await.unwrap();
        assert_eq!(hits[0], (a, 1.0));

        provider.remove(a).await.unwrap();
        let hits = provider.search("xyz", 5).await.unwrap();
        assert!(hits.iter().all(|(id, _)| *id != a));
    }

    #[tokio::test]
    async fn test_failures_become_provider_unavailable() {
        let provider = SemanticProvider::in_memory(Arc::new(FixedEmbedder { dims: 4 }));
        let err = provider.search("", 5).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProvFailed);
    }

    #[test]
    fn test_embedder_config_defaults() {
        let config: EmbedderConfig = serde_json::from_str(r#"{"model": "m"}"#).unwrap();
        assert_eq!(config.embedding_dims, 768);
        assert!(config.base_url.is_none());
    }
}
