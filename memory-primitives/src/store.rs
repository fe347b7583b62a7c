//! The store contract implemented by every backend, plus optional capabilities.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::embeddings::EmbeddingVector;
use crate::entry::{EntryPatch, MemoryEntry, MemoryType};
use crate::query::MemoryQuery;
use crate::result::{MemoryResult, MemoryStats};
use crate::StoreResult;

/// Operations every memory backend provides.
///
/// Backend failures never escape these methods: they are logged and turned
/// into `false` or an unsuccessful [`MemoryResult`]. The only fallible
/// signature is [`get_stats`](Self::get_stats), whose error is surfaced in
/// aggregate reports.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Short label of the backend kind (`short_term`, `cache`, `vector`).
    fn kind(&self) -> &'static str;

    /// Connects, creates schemas and starts background work.
    async fn initialize(&self) -> bool;

    /// Persists an entry, replacing any entry with the same id.
    async fn store(&self, entry: MemoryEntry) -> bool;

    /// Runs a query.
    async fn retrieve(&self, query: &MemoryQuery) -> MemoryResult;

    /// Merges `patch` into the entry with `id`; `false` when absent.
    async fn update(&self, id: &str, patch: EntryPatch) -> bool;

    /// Removes the entry with `id`; `false` when absent.
    async fn delete(&self, id: &str) -> bool;

    /// Removes every entry, or only entries of `memory_type`.
    async fn clear(&self, memory_type: Option<MemoryType>) -> bool;

    /// Returns a statistics snapshot.
    async fn get_stats(&self) -> StoreResult<MemoryStats>;

    /// Returns `true` when the backend can serve requests.
    async fn health_check(&self) -> bool;

    /// Stops background work and releases connections. Idempotent.
    async fn close(&self);

    /// Vector operations, when supported.
    fn as_vector(&self) -> Option<&dyn VectorCapable> {
        None
    }

    /// Raw key-value operations, when supported.
    fn as_key_value(&self) -> Option<&dyn KeyValueCapable> {
        None
    }
}

/// Embedding creation and similarity search.
#[async_trait]
pub trait VectorCapable: Send + Sync {
    /// Embeds `text`; `None` when no embedding could be produced.
    async fn create_embedding(&self, text: &str) -> Option<EmbeddingVector>;

    /// Returns up to `limit` neighbours scoring at or above `threshold`.
    async fn similarity_search(
        &self,
        embedding: &EmbeddingVector,
        limit: usize,
        threshold: f32,
    ) -> MemoryResult;

    /// Embeds `text` and runs [`similarity_search`](Self::similarity_search).
    async fn semantic_search(&self, text: &str, limit: usize, threshold: f32) -> MemoryResult {
        match self.create_embedding(text).await {
            Some(embedding) => self.similarity_search(&embedding, limit, threshold).await,
            None => MemoryResult::empty(),
        }
    }
}

/// Opaque value stored through [`KeyValueCapable`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// Structured value, stored as JSON text.
    Json(Value),
    /// Unstructured blob, stored binary-safe.
    Bytes(Bytes),
}

/// Leading byte marking a binary blob; never the first byte of valid JSON.
const BINARY_MARKER: u8 = 0xFF;

impl CacheValue {
    /// Encodes the value for storage.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MemoryError::Serialization`] when the JSON value cannot be encoded.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        match self {
            Self::Json(value) => Ok(serde_json::to_vec(value)?),
            Self::Bytes(bytes) => {
                let mut encoded = Vec::with_capacity(bytes.len() + 1);
                encoded.push(BINARY_MARKER);
                encoded.extend_from_slice(bytes);
                Ok(encoded)
            }
        }
    }

    /// Decodes a stored value. Unmarked data that is not valid JSON is
    /// returned as a blob.
    #[must_use]
    pub fn decode(raw: &[u8]) -> Self {
        if let Some((&BINARY_MARKER, rest)) = raw.split_first() {
            return Self::Bytes(Bytes::copy_from_slice(rest));
        }
        serde_json::from_slice(raw)
            .map_or_else(|_| Self::Bytes(Bytes::copy_from_slice(raw)), Self::Json)
    }

    /// Returns the JSON value, if structured.
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Bytes(_) => None,
        }
    }
}

impl From<Value> for CacheValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Bytes> for CacheValue {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

/// Raw key-value operations independent of the [`MemoryEntry`] shape.
#[async_trait]
pub trait KeyValueCapable: Send + Sync {
    /// Writes `value` under `key`, expiring after `ttl` (or the backend default).
    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> bool;

    /// Reads the value under `key`.
    async fn get(&self, key: &str) -> Option<CacheValue>;

    /// Returns `true` when `key` exists.
    async fn exists(&self, key: &str) -> bool;

    /// Resets the expiry of `key`; `false` when absent.
    async fn expire(&self, key: &str, ttl: Duration) -> bool;

    /// Remaining time-to-live of `key`, if it exists and expires.
    async fn ttl(&self, key: &str) -> Option<Duration>;

    /// Removes `key`; `false` when absent.
    async fn delete_key(&self, key: &str) -> bool;
}
