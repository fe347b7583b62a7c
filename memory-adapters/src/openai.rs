//! `OpenAI`-compatible embedding provider.

use std::{env, fmt, time::Duration};

use async_trait::async_trait;
use hyper::Uri;
use memory_primitives::{EmbeddingProvider, EmbeddingVector, StoreResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AdapterError, AdapterResult};
use crate::http_client::{build_https_client, endpoint, sanitize_base_url, HyperClient, JsonPost};

/// Environment variable used when loading configuration automatically.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Configuration for the `OpenAI` embedding provider.
#[derive(Clone)]
pub struct OpenAiEmbeddingConfig {
    api_key: Option<String>,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl fmt::Debug for OpenAiEmbeddingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbeddingConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OpenAiEmbeddingConfig {
    /// Creates a configuration using the supplied model identifier.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            api_key: None,
            model: model.into(),
            base_url: "https://api.openai.com/".to_owned(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Loads the API key from the `OPENAI_API_KEY` environment variable.
    #[must_use]
    pub fn from_env(model: impl Into<String>) -> Self {
        let mut cfg = Self::new(model);
        cfg.api_key = env::var(OPENAI_API_KEY_ENV).ok();
        cfg
    }

    /// Overrides the base URL, e.g. for a self-hosted compatible server.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the supplied URL is invalid.
    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> AdapterResult<Self> {
        self.base_url = sanitize_base_url(base_url.as_ref(), "OpenAI")?;
        Ok(self)
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Supplies an explicit API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Embedding provider calling `POST /v1/embeddings`.
///
/// Batches are sent as a single request.
pub struct OpenAiEmbedder {
    client: HyperClient,
    endpoint: Uri,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl OpenAiEmbedder {
    /// Constructs a provider with the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the API key is missing or the
    /// endpoint is invalid.
    pub fn new(config: OpenAiEmbeddingConfig) -> AdapterResult<Self> {
        let api_key = config
            .api_key
            .ok_or_else(|| AdapterError::configuration("OpenAI embedder requires an API key"))?;

        Ok(Self {
            endpoint: endpoint(&config.base_url, "v1/embeddings", "OpenAI")?,
            client: build_https_client(),
            model: config.model,
            api_key,
            timeout: config.timeout,
        })
    }

    /// Returns the embedding model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request_embeddings(&self, inputs: &[&str]) -> AdapterResult<Vec<EmbeddingVector>> {
        let payload = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };
        let bytes = JsonPost {
            client: &self.client,
            endpoint: &self.endpoint,
            bearer: Some(&self.api_key),
            timeout: self.timeout,
            provider: "OpenAI",
        }
        .send(&payload)
        .await?;

        let response: EmbeddingResponse = serde_json::from_slice(&bytes).map_err(|err| {
            AdapterError::response(format!("failed to decode OpenAI response: {err}"))
        })?;
        parse_response(response, inputs.len())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> StoreResult<EmbeddingVector> {
        let mut vectors = self.request_embeddings(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| AdapterError::response("OpenAI returned no embedding").into())
    }

    async fn embed_batch(&self, texts: &[String]) -> StoreResult<Vec<EmbeddingVector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = self.request_embeddings(&inputs).await?;
        debug!(model = %self.model, count = vectors.len(), "openai embeddings created");
        Ok(vectors)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Orders vectors by their `index` and checks one came back per input.
fn parse_response(response: EmbeddingResponse, expected: usize) -> AdapterResult<Vec<EmbeddingVector>> {
    let mut data = response.data;
    if data.len() != expected {
        return Err(AdapterError::response(format!(
            "OpenAI returned {} embeddings for {expected} inputs",
            data.len()
        )));
    }
    data.sort_by_key(|item| item.index);
    data.into_iter()
        .map(|item| {
            EmbeddingVector::new(item.embedding)
                .map_err(|err| AdapterError::response(format!("unusable OpenAI embedding: {err}")))
        })
        .collect()
}
