//! Embedding providers that call model servers over HTTP.
//!
//! Both providers implement [`EmbeddingProvider`](memory_primitives::EmbeddingProvider)
//! and can be attached to a vector store or handed to the store factory.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod http_client;
pub mod ollama;
pub mod openai;

pub use error::{AdapterError, AdapterResult};
pub use ollama::{OllamaEmbedder, OllamaEmbeddingConfig};
pub use openai::{OpenAiEmbedder, OpenAiEmbeddingConfig, OPENAI_API_KEY_ENV};
