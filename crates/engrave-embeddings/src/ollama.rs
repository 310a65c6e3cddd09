//! Ollama embedding provider implementation.

use async_trait::async_trait;
use url::Url;

use engrave_core::error::{EngraveError, EngraveResult};
use engrave_core::semantic::{Embedder, EmbedderConfig};

#[cfg(feature = "ollama")]
use tracing::debug;

#[cfg(feature = "ollama")]
use ollama_rs::{
    generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest},
    Ollama,
};

#[cfg(feature = "ollama")]
use crate::vectors::{check_batch, check_dimension};

const DEFAULT_HOST: &str = "http://localhost:11434";
const DEFAULT_PORT: u16 = 11434;

/// Where an Ollama server listens, as the client wants it: `scheme://host` and a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OllamaServer {
    pub host: String,
    pub port: u16,
}

impl OllamaServer {
    /// Parse a server address. `OLLAMA_HOST` style values without a scheme
    /// are read as plain http.
    ///
    /// The client always talks to the server root, so an address with a
    /// path prefix is rejected instead of having its path silently dropped.
    pub fn parse(address: &str) -> EngraveResult<Self> {
        let address = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let url = Url::parse(&address)
            .map_err(|e| EngraveError::Configuration(format!("Invalid Ollama URL: {}", e)))?;

        if !matches!(url.path(), "" | "/") {
            return Err(EngraveError::Configuration(format!(
                "Ollama URL must point at the server root, found path '{}'",
                url.path()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| EngraveError::Configuration(format!("Ollama URL has no host: {}", address)))?;

        Ok(Self {
            host: format!("{}://{}", url.scheme(), host),
            port: url.port_or_known_default().unwrap_or(DEFAULT_PORT),
        })
    }

    fn resolve(config: &EmbedderConfig) -> EngraveResult<Self> {
        let address = config
            .base_url
            .clone()
            .or_else(|| std::env::var("OLLAMA_HOST").ok())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        Self::parse(&address)
    }
}

/// Ollama embedding provider.
pub struct OllamaEmbedder {
    #[cfg(feature = "ollama")]
    client: Ollama,
    server: OllamaServer,
    config: EmbedderConfig,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder.
    pub fn new(config: EmbedderConfig) -> EngraveResult<Self> {
        let server = OllamaServer::resolve(&config)?;

        #[cfg(feature = "ollama")]
        let client = Ollama::new(server.host.clone(), server.port);

        Ok(Self {
            #[cfg(feature = "ollama")]
            client,
            server,
            config,
        })
    }

    /// The server requests are sent to.
    pub fn server(&self) -> &OllamaServer {
        &self.server
    }

    #[cfg(feature = "ollama")]
    async fn request(&self, input: EmbeddingsInput) -> EngraveResult<Vec<Vec<f32>>> {
        let request = GenerateEmbeddingsRequest::new(self.config.model.clone(), input);
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| EngraveError::provider(format!("Ollama embedding error: {}", e)))?;
        Ok(response.embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    #[cfg(feature = "ollama")]
    async fn embed(&self, text: &str) -> EngraveResult<Vec<f32>> {
        let embedding = self
            .request(EmbeddingsInput::Single(text.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngraveError::bad_response("Ollama returned no embedding"))?;

        debug!(model = %self.config.model, dims = embedding.len(), "Ollama embedding");
        check_dimension("Ollama", self.config.embedding_dims, embedding)
    }

    #[cfg(not(feature = "ollama"))]
    async fn embed(&self, _text: &str) -> EngraveResult<Vec<f32>> {
        Err(EngraveError::provider_absent(
            "Ollama feature not enabled. Enable the 'ollama' feature.",
        ))
    }

    #[cfg(feature = "ollama")]
    async fn embed_batch(&self, texts: &[String]) -> EngraveResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.request(EmbeddingsInput::Multiple(texts.to_vec())).await?;
        check_batch("Ollama", self.config.embedding_dims, texts.len(), embeddings)
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

    fn with_base_url(base_url: &str) -> EngraveResult<OllamaEmbedder> {
        OllamaEmbedder::new(EmbedderConfig {
            base_url: Some(base_url.to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn test_server_from_base_url() {
        let embedder = with_base_url("http://gpu-box:11500").unwrap();
        assert_eq!(
            embedder.server(),
            &OllamaServer {
                host: "http://gpu-box".to_string(),
                port: 11500
            }
        );
        assert_eq!(embedder.model_name(), "nomic-embed-text");
        assert_eq!(embedder.dimension(), 768);
    }

    #[test]
    fn test_scheme_and_default_ports() {
        let tls = OllamaServer::parse("https://ollama.internal/").unwrap();
        assert_eq!(tls.host, "https://ollama.internal");
        assert_eq!(tls.port, 443);

        let bare = OllamaServer::parse("0.0.0.0:11434").unwrap();
        assert_eq!(bare.host, "http://0.0.0.0");
        assert_eq!(bare.port, 11434);
    }

    #[test]
    fn test_path_prefix_rejected() {
        let result = with_base_url("http://proxy.local:8080/ollama");
        match result {
            Err(EngraveError::Configuration(message)) => assert!(message.contains("/ollama")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("path prefix should be rejected"),
        }
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(matches!(with_base_url("not a url"), Err(EngraveError::Configuration(_))));
    }

    #[cfg(not(feature = "ollama"))]
    #[tokio::test]
    async fn test_disabled_feature_reports_absent_provider() {
        use engrave_core::error::ErrorCode;

        let embedder = with_base_url("http://localhost:11434").unwrap();
        let err = embedder.embed("hello").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProvAbsent);
    }
}
