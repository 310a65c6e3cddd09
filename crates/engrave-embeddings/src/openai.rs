//! OpenAI embedding provider implementation.

use async_trait::async_trait;

use engrave_core::error::{EngraveError, EngraveResult};
use engrave_core::semantic::{Embedder, EmbedderConfig};

#[cfg(feature = "openai")]
use async_openai::{
    config::OpenAIConfig,
    types::{CreateEmbeddingRequest, EmbeddingInput},
    Client,
};
#[cfg(feature = "openai")]
use tracing::debug;

#[cfg(feature = "openai")]
use crate::vectors::{check_batch, check_dimension};

/// Key from the config, else `OPENAI_API_KEY`. Blank keys count as missing.
fn resolve_api_key(config: &EmbedderConfig) -> EngraveResult<String> {
    let present = |key: &String| !key.trim().is_empty();
    config
        .api_key
        .clone()
        .filter(present)
        .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(present))
        .ok_or_else(|| {
            EngraveError::Configuration(
                "OpenAI API key not found. Set OPENAI_API_KEY or provide api_key in the embedder config."
                    .to_string(),
            )
        })
}

/// The `dimensions` request field, which the API takes as a u32.
fn requested_dimensions(config: &EmbedderConfig) -> EngraveResult<u32> {
    match u32::try_from(config.embedding_dims) {
        Ok(dims) if dims > 0 => Ok(dims),
        _ => Err(EngraveError::Configuration(format!(
            "embedding_dims {} is not a valid OpenAI dimension count",
            config.embedding_dims
        ))),
    }
}

/// OpenAI embedding provider.
pub struct OpenAIEmbedder {
    #[cfg(feature = "openai")]
    client: Client<OpenAIConfig>,
    dimensions: u32,
    config: EmbedderConfig,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder.
    pub fn new(config: EmbedderConfig) -> EngraveResult<Self> {
        let api_key = resolve_api_key(&config)?;
        let dimensions = requested_dimensions(&config)?;

        #[cfg(feature = "openai")]
        let client = {
            let openai_config = OpenAIConfig::new().with_api_key(api_key);
            let openai_config = match config.base_url {
                Some(ref base_url) => openai_config.with_api_base(base_url),
                None => openai_config,
            };
            Client::with_config(openai_config)
        };

        #[cfg(not(feature = "openai"))]
        let _ = api_key;

        Ok(Self {
            #[cfg(feature = "openai")]
            client,
            dimensions,
            config,
        })
    }

    /// Send one embeddings request and return the vectors in input order.
    #[cfg(feature = "openai")]
    async fn request(&self, input: EmbeddingInput) -> EngraveResult<Vec<Vec<f32>>> {
        let request = CreateEmbeddingRequest {
            model: self.config.model.clone(),
            input,
            dimensions: Some(self.dimensions),
            ..Default::default()
        };

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| EngraveError::provider(format!("OpenAI embedding error: {}", e)))?;

        debug!(
            model = %response.model,
            vectors = response.data.len(),
            prompt_tokens = response.usage.prompt_tokens,
            "OpenAI embeddings"
        );
        let mut data = response.data;
        data.sort_by_key(|embedding| embedding.index);
        Ok(data.into_iter().map(|embedding| embedding.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    #[cfg(feature = "openai")]
    async fn embed(&self, text: &str) -> EngraveResult<Vec<f32>> {
        let mut embeddings = self.request(EmbeddingInput::String(text.to_string())).await?;
        if embeddings.len() != 1 {
            return Err(EngraveError::bad_response(format!(
                "OpenAI returned {} embeddings for one input",
                embeddings.len()
            )));
        }
        check_dimension("OpenAI", self.config.embedding_dims, embeddings.remove(0))
    }

    #[cfg(not(feature = "openai"))]
    async fn embed(&self, _text: &str) -> EngraveResult<Vec<f32>> {
        Err(EngraveError::provider_absent(
            "OpenAI feature not enabled. Enable the 'openai' feature.",
        ))
    }

    #[cfg(feature = "openai")]
    async fn embed_batch(&self, texts: &[String]) -> EngraveResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.request(EmbeddingInput::StringArray(texts.to_vec())).await?;
        check_batch("OpenAI", self.config.embedding_dims, texts.len(), embeddings)
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dims
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_key: Option<&str>, dims: usize) -> EmbedderConfig {
        EmbedderConfig {
            model: "text-embedding-3-small".to_string(),
            embedding_dims: dims,
            api_key: api_key.map(str::to_string),
            base_url: None,
        }
    }

    #[test]
    fn test_explicit_api_key_accepted() {
        let embedder = OpenAIEmbedder::new(config(Some("sk-test"), 1536)).unwrap();
        assert_eq!(embedder.dimension(), 1536);
        assert_eq!(embedder.dimensions, 1536);
        assert_eq!(embedder.model_name(), "text-embedding-3-small");
    }

    #[test]
    fn test_blank_api_key_is_missing() {
        if std::env::var("OPENAI_API_KEY").is_ok() {
            return;
        }
        assert!(matches!(
            resolve_api_key(&config(Some("   "), 1536)),
            Err(EngraveError::Configuration(_))
        ));
    }

    #[test]
    fn test_unusable_dimension_count_rejected() {
        assert!(matches!(
            OpenAIEmbedder::new(config(Some("sk-test"), 0)),
            Err(EngraveError::Configuration(_))
        ));
        assert!(requested_dimensions(&config(None, usize::MAX)).is_err());
        assert_eq!(requested_dimensions(&config(None, 256)).unwrap(), 256);
    }
}
