//! Memory entries, their routing category, and partial updates.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::embeddings::EmbeddingVector;
use crate::{MemoryError, StoreResult};

/// Category used to route an entry to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Ephemeral, process-local memory.
    ShortTerm,
    /// Durable memory, usually backed by the vector store.
    LongTerm,
    /// Shared TTL-bounded cache.
    Cache,
    /// Similarity-searchable memory.
    Vector,
}

impl MemoryType {
    /// All categories, in declaration order.
    pub const ALL: [Self; 4] = [Self::ShortTerm, Self::LongTerm, Self::Cache, Self::Vector];

    /// Returns the stable wire label of the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
            Self::Cache => "cache",
            Self::Vector => "vector",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short_term" => Ok(Self::ShortTerm),
            "long_term" => Ok(Self::LongTerm),
            "cache" => Ok(Self::Cache),
            "vector" => Ok(Self::Vector),
            _ => Err(MemoryError::InvalidEntry("unknown memory type")),
        }
    }
}

/// A single stored piece of memory.
///
/// Entries are immutable by convention: backends only change them through
/// [`MemoryEntry::apply_patch`], which never touches `id`, `memory_type` or
/// `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    id: String,
    content: String,
    #[serde(default)]
    metadata: Map<String, Value>,
    memory_type: MemoryType,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    embedding: Option<EmbeddingVector>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    priority: i32,
}

impl MemoryEntry {
    /// Creates a builder for a new entry.
    #[must_use]
    pub fn builder(content: impl Into<String>, memory_type: MemoryType) -> MemoryEntryBuilder {
        MemoryEntryBuilder {
            id: None,
            content: content.into(),
            metadata: Map::new(),
            memory_type,
            timestamp: None,
            ttl: None,
            embedding: None,
            tags: Vec::new(),
            priority: 0,
        }
    }

    /// Returns the unique identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the text payload.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the metadata map.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Returns a metadata value as a string slice, if present and textual.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Returns the routing category.
    #[must_use]
    pub const fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    /// Returns the creation time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the explicit time-to-live, if any.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl.map(Duration::from_secs)
    }

    /// Returns the explicit time-to-live in whole seconds.
    #[must_use]
    pub const fn ttl_secs(&self) -> Option<u64> {
        self.ttl
    }

    /// Returns the attached embedding, if any.
    #[must_use]
    pub fn embedding(&self) -> Option<&EmbeddingVector> {
        self.embedding.as_ref()
    }

    /// Returns the tags.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns the priority; higher values rank first.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns `true` when the entry carries at least one of `tags`.
    #[must_use]
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|tag| self.tags.contains(tag))
    }

    /// Returns the instant after which the entry's own TTL has elapsed.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = i64::try_from(self.ttl?).ok()?;
        self.timestamp
            .checked_add_signed(chrono::TimeDelta::try_seconds(ttl)?)
    }

    /// Returns `true` when the entry's own TTL has elapsed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|deadline| now > deadline)
    }

    /// Approximate in-memory footprint in bytes.
    #[must_use]
    pub fn approximate_size(&self) -> usize {
        let metadata: usize = self
            .metadata
            .iter()
            .map(|(key, value)| key.len() + value.to_string().len())
            .sum();
        let tags: usize = self.tags.iter().map(String::len).sum();
        let embedding = self
            .embedding
            .as_ref()
            .map_or(0, |vector| vector.len() * std::mem::size_of::<f32>());
        std::mem::size_of::<Self>() + self.id.len() + self.content.len() + metadata + tags + embedding
    }

    /// Attaches (or replaces) the embedding.
    pub fn set_embedding(&mut self, embedding: EmbeddingVector) {
        self.embedding = Some(embedding);
    }

    /// Merges a partial update into the entry.
    ///
    /// Metadata keys are merged; every other supplied field replaces the
    /// current value.
    pub fn apply_patch(&mut self, patch: EntryPatch) {
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(metadata) = patch.metadata {
            self.metadata.extend(metadata);
        }
        if let Some(tags) = patch.tags {
            self.tags = dedup_tags(tags);
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(ttl) = patch.ttl {
            self.ttl = Some(ttl);
        }
        if let Some(embedding) = patch.embedding {
            self.embedding = Some(embedding);
        }
    }
}

fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        if !unique.contains(&tag) {
            unique.push(tag);
        }
    }
    unique
}

/// Builder used to assemble [`MemoryEntry`] instances safely.
#[derive(Debug)]
pub struct MemoryEntryBuilder {
    id: Option<String>,
    content: String,
    metadata: Map<String, Value>,
    memory_type: MemoryType,
    timestamp: Option<DateTime<Utc>>,
    ttl: Option<u64>,
    embedding: Option<EmbeddingVector>,
    tags: Vec<String>,
    priority: i32,
}

impl MemoryEntryBuilder {
    /// Overrides the generated identifier.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the creation timestamp (defaults to now).
    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Adds a full metadata map, overwriting existing keys when duplicates occur.
    #[must_use]
    pub fn merge_metadata(mut self, map: Map<String, Value>) -> Self {
        self.metadata.extend(map);
        self
    }

    /// Sets the time-to-live, truncated to whole seconds.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl.as_secs());
        self
    }

    /// Sets the time-to-live in seconds.
    #[must_use]
    pub fn ttl_secs(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Attaches an embedding.
    #[must_use]
    pub fn embedding(mut self, embedding: EmbeddingVector) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a single tag after validating that it is not empty.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidEntry`] when the tag is empty or whitespace.
    pub fn tag(mut self, tag: impl Into<String>) -> StoreResult<Self> {
        let value = tag.into();
        if value.trim().is_empty() {
            return Err(MemoryError::InvalidEntry("memory tags must not be empty"));
        }
        if !self.tags.contains(&value) {
            self.tags.push(value);
        }
        Ok(self)
    }

    /// Extends the entry with multiple tags.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidEntry`] if any supplied tag is empty.
    pub fn tags<I, S>(mut self, tags: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            self = self.tag(tag)?;
        }
        Ok(self)
    }

    /// Finalises the builder, generating an id when none was supplied.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidEntry`] when an explicit id is blank.
    pub fn build(self) -> StoreResult<MemoryEntry> {
        let id = match self.id {
            Some(id) if id.trim().is_empty() => {
                return Err(MemoryError::InvalidEntry("memory entry id must not be empty"));
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };

        Ok(MemoryEntry {
            id,
            content: self.content,
            metadata: self.metadata,
            memory_type: self.memory_type,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            ttl: self.ttl,
            embedding: self.embedding,
            tags: self.tags,
            priority: self.priority,
        })
    }
}

/// Partial field update applied by `update()`.
///
/// `id`, `memory_type` and `timestamp` are deliberately absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryPatch {
    content: Option<String>,
    metadata: Option<Map<String, Value>>,
    tags: Option<Vec<String>>,
    priority: Option<i32>,
    ttl: Option<u64>,
    embedding: Option<EmbeddingVector>,
}

impl EntryPatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the content.
    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Merges the supplied keys into the entry metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Replaces the tag set.
    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Replaces the priority.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Replaces the time-to-live.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl.as_secs());
        self
    }

    /// Replaces the embedding.
    #[must_use]
    pub fn embedding(mut self, embedding: EmbeddingVector) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Returns the new time-to-live when the patch sets one.
    #[must_use]
    pub fn ttl_override(&self) -> Option<Duration> {
        self.ttl.map(Duration::from_secs)
    }

    /// Returns `true` when the patch replaces the content.
    #[must_use]
    pub const fn touches_content(&self) -> bool {
        self.content.is_some()
    }

    /// Returns `true` when the patch supplies an embedding.
    #[must_use]
    pub const fn sets_embedding(&self) -> bool {
        self.embedding.is_some()
    }

    /// Returns `true` when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_generates_id_and_dedups_tags() {
        let entry = MemoryEntry::builder("hello", MemoryType::ShortTerm)
            .tags(["a", "b", "a"])
            .unwrap()
            .build()
            .unwrap();

        assert!(!entry.id().is_empty());
        assert_eq!(entry.tags(), ["a", "b"]);
        assert_eq!(entry.memory_type(), MemoryType::ShortTerm);
    }

    #[test]
    fn builder_rejects_blank_tags_and_ids() {
        let err = MemoryEntry::builder("x", MemoryType::Cache)
            .tag(" ")
            .expect_err("blank tag should fail");
        assert!(matches!(err, MemoryError::InvalidEntry(_)));

        let err = MemoryEntry::builder("x", MemoryType::Cache)
            .id("")
            .build()
            .expect_err("blank id should fail");
        assert!(matches!(err, MemoryError::InvalidEntry(_)));
    }

    #[test]
    fn patch_merges_metadata_and_keeps_identity() {
        let mut entry = MemoryEntry::builder("before", MemoryType::LongTerm)
            .id("fixed")
            .metadata("keep", "yes")
            .metadata("swap", 1)
            .build()
            .unwrap();
        let created = entry.timestamp();

        let mut metadata = Map::new();
        metadata.insert("swap".into(), Value::from(2));
        entry.apply_patch(
            EntryPatch::new()
                .content("after")
                .metadata(metadata)
                .priority(7),
        );

        assert_eq!(entry.id(), "fixed");
        assert_eq!(entry.content(), "after");
        assert_eq!(entry.metadata_str("keep"), Some("yes"));
        assert_eq!(entry.metadata().get("swap"), Some(&Value::from(2)));
        assert_eq!(entry.priority(), 7);
        assert_eq!(entry.memory_type(), MemoryType::LongTerm);
        assert_eq!(entry.timestamp(), created);
    }

    #[test]
    fn expiry_uses_own_ttl() {
        let created = Utc::now();
        let entry = MemoryEntry::builder("t", MemoryType::ShortTerm)
            .timestamp(created)
            .ttl_secs(10)
            .build()
            .unwrap();

        assert!(!entry.is_expired_at(created + chrono::Duration::seconds(5)));
        assert!(entry.is_expired_at(created + chrono::Duration::seconds(11)));
    }

    #[test]
    fn memory_type_labels_parse_back() {
        for kind in MemoryType::ALL {
            assert_eq!(kind.as_str().parse::<MemoryType>().unwrap(), kind);
        }
        assert!("episodic".parse::<MemoryType>().is_err());
    }

    #[test]
    fn entry_json_preserves_every_field() {
        let entry = MemoryEntry::builder("payload", MemoryType::Cache)
            .metadata("source", "unit")
            .ttl_secs(30)
            .priority(3)
            .embedding(EmbeddingVector::new(vec![0.5, 0.25]).unwrap())
            .tag("x")
            .unwrap()
            .build()
            .unwrap();

        let json = serde_json::to_string(&entry).unwrap();
        let decoded: MemoryEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, entry);
    }
}
