//! Collection surface of the vector service and the objects it stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memory_primitives::{EmbeddingVector, MemoryEntry, MemoryType, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Properties every memory collection declares.
pub const SCHEMA_PROPERTIES: [&str; 6] = [
    "content",
    "memory_type",
    "timestamp",
    "metadata",
    "tags",
    "priority",
];

/// One object in a collection: the schema properties plus an optional vector.
///
/// Metadata is persisted as serialized JSON text. The entry TTL is not part
/// of the schema and does not survive a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorObject {
    /// Object id, equal to the entry id.
    pub id: String,
    /// Text payload.
    pub content: String,
    /// Entry category.
    pub memory_type: MemoryType,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Serialized metadata map.
    pub metadata: String,
    /// Entry tags.
    pub tags: Vec<String>,
    /// Ranking priority.
    pub priority: i32,
    /// Vector used for similarity search.
    pub vector: Option<EmbeddingVector>,
}

impl VectorObject {
    /// Converts an entry into its stored form.
    ///
    /// # Errors
    ///
    /// Returns [`memory_primitives::MemoryError::Serialization`] when the metadata cannot be encoded.
    pub fn from_entry(entry: &MemoryEntry) -> StoreResult<Self> {
        Ok(Self {
            id: entry.id().to_owned(),
            content: entry.content().to_owned(),
            memory_type: entry.memory_type(),
            timestamp: entry.timestamp(),
            metadata: serde_json::to_string(entry.metadata())?,
            tags: entry.tags().to_vec(),
            priority: entry.priority(),
            vector: entry.embedding().cloned(),
        })
    }

    /// Rebuilds the entry.
    ///
    /// # Errors
    ///
    /// Returns an error when the stored metadata is not a JSON object or the
    /// stored fields no longer form a valid entry.
    pub fn into_entry(self) -> StoreResult<MemoryEntry> {
        let metadata: Map<String, Value> = if self.metadata.is_empty() {
            Map::new()
        } else {
            serde_json::from_str(&self.metadata)?
        };
        let mut builder = MemoryEntry::builder(self.content, self.memory_type)
            .id(self.id)
            .timestamp(self.timestamp)
            .merge_metadata(metadata)
            .priority(self.priority)
            .tags(self.tags)?;
        if let Some(vector) = self.vector {
            builder = builder.embedding(vector);
        }
        builder.build()
    }
}

/// Object paired with the relevance score the service assigned it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredObject {
    /// Matched object.
    pub object: VectorObject,
    /// Cosine similarity for vector queries, BM25 score for keyword queries.
    pub score: f32,
}

/// Commands the vector store needs from its service.
///
/// Every command names the collection (`class`) it targets. Results of the
/// search commands are ordered by descending score.
#[async_trait]
pub trait VectorCollection: Send + Sync {
    /// Checks the service is reachable and ready.
    async fn ready(&self) -> StoreResult<()>;

    /// Returns `true` when the collection exists.
    async fn has_schema(&self, class: &str) -> StoreResult<bool>;

    /// Creates the collection with the given properties.
    async fn create_schema(&self, class: &str, properties: &[&str]) -> StoreResult<()>;

    /// Drops the collection and every object in it.
    async fn delete_schema(&self, class: &str) -> StoreResult<()>;

    /// Inserts or replaces an object.
    async fn upsert(&self, class: &str, object: VectorObject) -> StoreResult<()>;

    /// Fetches an object by id.
    async fn get(&self, class: &str, id: &str) -> StoreResult<Option<VectorObject>>;

    /// Deletes an object by id; `false` when absent.
    async fn delete(&self, class: &str, id: &str) -> StoreResult<bool>;

    /// Deletes every object of `memory_type`; returns how many were removed.
    async fn delete_where_type(&self, class: &str, memory_type: MemoryType) -> StoreResult<usize>;

    /// Nearest neighbours of `vector` among objects that carry one.
    async fn near_vector(
        &self,
        class: &str,
        vector: &EmbeddingVector,
        limit: usize,
        memory_type: Option<MemoryType>,
    ) -> StoreResult<Vec<ScoredObject>>;

    /// Keyword (BM25) search over `content`.
    async fn bm25(
        &self,
        class: &str,
        query: &str,
        limit: usize,
        memory_type: Option<MemoryType>,
    ) -> StoreResult<Vec<ScoredObject>>;

    /// Every object, optionally restricted to `memory_type`.
    async fn list(&self, class: &str, memory_type: Option<MemoryType>) -> StoreResult<Vec<VectorObject>>;

    /// Number of objects, optionally restricted to `memory_type`.
    async fn count(&self, class: &str, memory_type: Option<MemoryType>) -> StoreResult<usize>;

    /// Releases the client.
    async fn close(&self);
}
