//! engrave-embeddings - Embedding provider implementations for engrave.
//!
//! Embeddings give the engine a semantic-similarity signal next to keyword
//! search. Without a provider the engine runs keyword-only.
//!
//! # Supported Providers
//!
//! - **Ollama** (feature: `ollama`) - nomic-embed-text, mxbai-embed-large, etc.
//! - **OpenAI** (feature: `openai`) - text-embedding-3-small, text-embedding-3-large, etc.
//!
//! Every vector a provider returns is checked against the configured
//! `embedding_dims` before it reaches the index.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use engrave_core::{EngineConfig, MemoryEngine, SqliteStore};
//! use engrave_embeddings::{EmbedderConfig, EmbedderFactory, EmbedderProvider};
//!
//! let semantic = EmbedderFactory::semantic(EmbedderProvider::Ollama, EmbedderConfig::default())?;
//! let config = EngineConfig::default();
//! let store = Arc::new(SqliteStore::new(&config.database_path)?);
//! let engine = MemoryEngine::open(config, store, semantic)?;
//! engine.rebuild_semantic_index().await?;
//! ```

mod factory;
mod ollama;
mod openai;
mod vectors;

pub use factory::EmbedderFactory;
pub use ollama::{OllamaEmbedder, OllamaServer};
pub use openai::OpenAIEmbedder;

// Re-export core types for convenience
pub use engrave_core::semantic::{Embedder, EmbedderConfig, EmbedderProvider, SemanticProvider};
