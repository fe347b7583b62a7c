//! Query filters shared by every backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::embeddings::EmbeddingVector;
use crate::entry::{MemoryEntry, MemoryType};
use crate::{MemoryError, StoreResult};

/// Largest accepted `limit`.
pub const MAX_QUERY_LIMIT: usize = 1000;
/// `limit` used when the caller does not set one.
pub const DEFAULT_QUERY_LIMIT: usize = 10;
/// Similarity cut-off used when the caller does not set one.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;
/// Metadata key selecting an entry's context window in the short-term store.
pub const CONTEXT_WINDOW_KEY: &str = "context_window";

/// Inclusive time window over entry timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    /// Creates a range.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidQuery`] when `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<Self> {
        if start > end {
            return Err(MemoryError::InvalidQuery("time range start is after its end"));
        }
        Ok(Self { start, end })
    }

    /// Returns the inclusive lower bound.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Returns the inclusive upper bound.
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Returns `true` when `instant` falls within the range.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

/// Filters and limits for a retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryQuery {
    content: Option<String>,
    memory_type: Option<MemoryType>,
    tags: Vec<String>,
    metadata_filters: Map<String, Value>,
    limit: usize,
    similarity_threshold: f32,
    time_range: Option<TimeRange>,
    embedding: Option<EmbeddingVector>,
}

impl Default for MemoryQuery {
    fn default() -> Self {
        Self {
            content: None,
            memory_type: None,
            tags: Vec::new(),
            metadata_filters: Map::new(),
            limit: DEFAULT_QUERY_LIMIT,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            time_range: None,
            embedding: None,
        }
    }
}

impl MemoryQuery {
    /// Creates an unfiltered query with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts results to entries whose content contains `needle`
    /// (case-insensitive).
    #[must_use]
    pub fn with_content(mut self, needle: impl Into<String>) -> Self {
        self.content = Some(needle.into());
        self
    }

    /// Restricts results to one category.
    #[must_use]
    pub fn with_memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }

    /// Restricts results to entries carrying at least one of the tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an exact-match metadata filter.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata_filters.insert(key.into(), value.into());
        self
    }

    /// Restricts a short-term retrieval to one context window.
    #[must_use]
    pub fn in_context_window(self, window: impl Into<String>) -> Self {
        self.with_metadata(CONTEXT_WINDOW_KEY, window.into())
    }

    /// Restricts results to the inclusive time range.
    #[must_use]
    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    /// Turns the query into a similarity query on vector backends.
    #[must_use]
    pub fn with_embedding(mut self, embedding: EmbeddingVector) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Sets the maximum number of returned entries.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidQuery`] unless `1 <= limit <= 1000`.
    pub fn with_limit(mut self, limit: usize) -> StoreResult<Self> {
        if limit == 0 || limit > MAX_QUERY_LIMIT {
            return Err(MemoryError::InvalidQuery("limit must be between 1 and 1000"));
        }
        self.limit = limit;
        Ok(self)
    }

    /// Sets the similarity cut-off used by vector backends.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidQuery`] unless the threshold is within `0..=1`.
    pub fn with_similarity_threshold(mut self, threshold: f32) -> StoreResult<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MemoryError::InvalidQuery(
                "similarity threshold must be between 0 and 1",
            ));
        }
        self.similarity_threshold = threshold;
        Ok(self)
    }

    /// Returns the content filter.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Returns the category filter.
    #[must_use]
    pub const fn memory_type(&self) -> Option<MemoryType> {
        self.memory_type
    }

    /// Returns the tag filter.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns the metadata filters.
    #[must_use]
    pub fn metadata_filters(&self) -> &Map<String, Value> {
        &self.metadata_filters
    }

    /// Returns the context window named by the metadata filters, if any.
    #[must_use]
    pub fn context_window(&self) -> Option<&str> {
        self.metadata_filters
            .get(CONTEXT_WINDOW_KEY)
            .and_then(Value::as_str)
    }

    /// Returns the result limit.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the similarity cut-off.
    #[must_use]
    pub const fn similarity_threshold(&self) -> f32 {
        self.similarity_threshold
    }

    /// Returns the time range filter.
    #[must_use]
    pub const fn time_range(&self) -> Option<TimeRange> {
        self.time_range
    }

    /// Returns the query embedding.
    #[must_use]
    pub fn embedding(&self) -> Option<&EmbeddingVector> {
        self.embedding.as_ref()
    }

    /// Applies the full predicate: type, content, tags, metadata and time range.
    #[must_use]
    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        self.matches_attributes(entry, &[]) && self.matches_content(entry)
    }

    /// Applies every filter except the content substring, skipping the
    /// metadata keys listed in `ignored_keys`.
    #[must_use]
    pub fn matches_attributes(&self, entry: &MemoryEntry, ignored_keys: &[&str]) -> bool {
        if self
            .memory_type
            .is_some_and(|kind| kind != entry.memory_type())
        {
            return false;
        }
        if !self.tags.is_empty() && !entry.has_any_tag(&self.tags) {
            return false;
        }
        let metadata_ok = self
            .metadata_filters
            .iter()
            .filter(|(key, _)| !ignored_keys.contains(&key.as_str()))
            .all(|(key, expected)| entry.metadata().get(key) == Some(expected));
        if !metadata_ok {
            return false;
        }
        self.time_range
            .is_none_or(|range| range.contains(entry.timestamp()))
    }

    /// Applies only the case-insensitive content substring filter.
    #[must_use]
    pub fn matches_content(&self, entry: &MemoryEntry) -> bool {
        match &self.content {
            Some(needle) => entry
                .content()
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> MemoryEntry {
        MemoryEntry::builder("The Quick Brown Fox", MemoryType::ShortTerm)
            .metadata("user", "ana")
            .tags(["animals", "colors"])
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn content_filter_is_case_insensitive() {
        assert!(MemoryQuery::new().with_content("quick brown").matches(&entry()));
        assert!(!MemoryQuery::new().with_content("lazy dog").matches(&entry()));
    }

    #[test]
    fn tags_use_or_semantics() {
        assert!(MemoryQuery::new().with_tags(["colors", "missing"]).matches(&entry()));
        assert!(!MemoryQuery::new().with_tags(["missing"]).matches(&entry()));
    }

    #[test]
    fn metadata_filters_must_all_hold() {
        let entry = entry();
        assert!(MemoryQuery::new().with_metadata("user", "ana").matches(&entry));
        assert!(
            !MemoryQuery::new()
                .with_metadata("user", "ana")
                .with_metadata("lang", "en")
                .matches(&entry)
        );
        assert!(
            MemoryQuery::new()
                .with_metadata("user", "ana")
                .with_metadata("lang", "en")
                .matches_attributes(&entry, &["lang"])
        );
    }

    #[test]
    fn time_range_is_inclusive() {
        let entry = entry();
        let at = entry.timestamp();
        let range = TimeRange::new(at, at).unwrap();
        assert!(MemoryQuery::new().with_time_range(range).matches(&entry));
        assert!(TimeRange::new(at, at - chrono::TimeDelta::seconds(1)).is_err());
    }

    #[test]
    fn limit_and_threshold_are_validated() {
        assert!(MemoryQuery::new().with_limit(0).is_err());
        assert!(MemoryQuery::new().with_limit(1001).is_err());
        assert_eq!(MemoryQuery::new().with_limit(1000).unwrap().limit(), 1000);
        assert!(MemoryQuery::new().with_similarity_threshold(1.5).is_err());
    }

    #[test]
    fn context_window_reads_metadata_filter() {
        let query = MemoryQuery::new().in_context_window("chat");
        assert_eq!(query.context_window(), Some("chat"));
        assert_eq!(MemoryQuery::new().context_window(), None);
    }
}
