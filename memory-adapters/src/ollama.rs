//! `Ollama` embedding provider.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use hyper::Uri;
use memory_primitives::{EmbeddingProvider, EmbeddingVector, StoreResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AdapterError, AdapterResult};
use crate::http_client::{build_https_client, endpoint, sanitize_base_url, HyperClient, JsonPost};

/// Configuration for the `Ollama` embedding provider.
#[derive(Clone, Debug)]
pub struct OllamaEmbeddingConfig {
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaEmbeddingConfig {
    /// Creates a configuration for the supplied embedding model using default settings.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            base_url: "http://127.0.0.1:11434/".to_owned(),
            model: model.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Overrides the base URL of the local Ollama daemon.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the supplied URL is invalid.
    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> AdapterResult<Self> {
        self.base_url = sanitize_base_url(base_url.as_ref(), "Ollama")?;
        Ok(self)
    }

    /// Sets the HTTP timeout for requests to the Ollama daemon.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Embedding provider calling `POST /api/embeddings` on an Ollama daemon.
pub struct OllamaEmbedder {
    client: HyperClient,
    endpoint: Uri,
    model: String,
    timeout: Duration,
}

impl fmt::Debug for OllamaEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OllamaEmbedder")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl OllamaEmbedder {
    /// Constructs a provider from the supplied configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the endpoint is invalid.
    pub fn new(config: OllamaEmbeddingConfig) -> AdapterResult<Self> {
        Ok(Self {
            endpoint: endpoint(&config.base_url, "api/embeddings", "Ollama")?,
            client: build_https_client(),
            model: config.model,
            timeout: config.timeout,
        })
    }

    /// Returns the embedding model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request_embedding(&self, text: &str) -> AdapterResult<EmbeddingVector> {
        let payload = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };
        let bytes = JsonPost {
            client: &self.client,
            endpoint: &self.endpoint,
            bearer: None,
            timeout: self.timeout,
            provider: "Ollama",
        }
        .send(&payload)
        .await?;

        let response: EmbeddingResponse = serde_json::from_slice(&bytes).map_err(|err| {
            AdapterError::response(format!("failed to decode Ollama response: {err}"))
        })?;
        parse_response(response)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> StoreResult<EmbeddingVector> {
        let vector = self.request_embedding(text).await?;
        debug!(model = %self.model, dimensions = vector.len(), "ollama embedding created");
        Ok(vector)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
    #[serde(default)]
    error: Option<String>,
}

fn parse_response(response: EmbeddingResponse) -> AdapterResult<EmbeddingVector> {
    if let Some(error) = response.error {
        return Err(AdapterError::response(error));
    }
    EmbeddingVector::new(response.embedding)
        .map_err(|err| AdapterError::response(format!("unusable Ollama embedding: {err}")))
}
