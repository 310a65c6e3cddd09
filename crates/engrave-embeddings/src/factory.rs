//! Factory for creating embedding providers.

use std::sync::Arc;

use engrave_core::error::EngraveResult;
use engrave_core::semantic::{Embedder, EmbedderConfig, EmbedderProvider, SemanticProvider};

use crate::ollama::OllamaEmbedder;
use crate::openai::OpenAIEmbedder;

/// Factory for creating embedding providers.
pub struct EmbedderFactory;

impl EmbedderFactory {
    /// Create an embedder from the given configuration.
    pub fn create(provider: EmbedderProvider, config: EmbedderConfig) -> EngraveResult<Arc<dyn Embedder>> {
        match provider {
            EmbedderProvider::Ollama => Ok(Arc::new(OllamaEmbedder::new(config)?)),
            EmbedderProvider::OpenAI => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        }
    }

    /// Create an Ollama embedder with default configuration (nomic-embed-text, 768 dims).
    pub fn ollama() -> EngraveResult<Arc<dyn Embedder>> {
        Self::create(EmbedderProvider::Ollama, EmbedderConfig::default())
    }

    /// Create an Ollama embedder with a specific model.
    pub fn ollama_with_model(model: impl Into<String>, dims: usize) -> EngraveResult<Arc<dyn Embedder>> {
        let config = EmbedderConfig {
            model: model.into(),
            embedding_dims: dims,
            ..Default::default()
        };
        Self::create(EmbedderProvider::Ollama, config)
    }

    /// Create an OpenAI embedder (text-embedding-3-small, 1536 dims).
    pub fn openai() -> EngraveResult<Arc<dyn Embedder>> {
        Self::openai_with_model("text-embedding-3-small", 1536)
    }

    /// Create an OpenAI embedder with a specific model.
    pub fn openai_with_model(model: impl Into<String>, dims: usize) -> EngraveResult<Arc<dyn Embedder>> {
        let config = EmbedderConfig {
            model: model.into(),
            embedding_dims: dims,
            ..Default::default()
        };
        Self::create(EmbedderProvider::OpenAI, config)
    }

    /// Build a semantic provider backed by an in-memory vector index.
    pub fn semantic(provider: EmbedderProvider, config: EmbedderConfig) -> EngraveResult<SemanticProvider> {
        Ok(SemanticProvider::in_memory(Self::create(provider, config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_with_model() {
        let embedder = EmbedderFactory::ollama_with_model("mxbai-embed-large", 1024).unwrap();
        assert_eq!(embedder.model_name(), "mxbai-embed-large");
        assert_eq!(embedder.dimension(), 1024);
    }

    #[test]
    fn test_semantic_provider_is_present() {
        let provider = EmbedderFactory::semantic(EmbedderProvider::Ollama, EmbedderConfig::default()).unwrap();
        assert!(!provider.is_absent());
    }
}
