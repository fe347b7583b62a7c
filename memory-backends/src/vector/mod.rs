//! Schema-managed, similarity-searchable memory store.

mod collection;
mod local;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use memory_config::VectorConfig;
use memory_primitives::{
    rank_entries, EmbeddingProvider, EmbeddingVector, EntryPatch, MemoryEntry, MemoryQuery,
    MemoryResult, MemoryStats, MemoryStore, MemoryType, StoreResult, VectorCapable,
    MAX_QUERY_LIMIT,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::stats::StoreCounters;

pub use collection::{ScoredObject, VectorCollection, VectorObject, SCHEMA_PROPERTIES};
pub use local::LocalVectorCollection;

/// Memory store over a [`VectorCollection`], with optional embedding support.
pub struct VectorStore {
    config: VectorConfig,
    collection: Arc<dyn VectorCollection>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    schema_ready: Mutex<bool>,
    counters: StoreCounters,
    closed: AtomicBool,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("config", &self.config)
            .field("embedder", &self.embedder.is_some())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn logged<T>(operation: &'static str, result: StoreResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(operation, ?err, "vector operation failed");
            None
        }
    }
}

/// Converts scored objects into entries, skipping objects that no longer
/// decode and hits the caller filters out.
fn collect_hits(
    hits: Vec<ScoredObject>,
    mut keep: impl FnMut(&MemoryEntry, f32) -> bool,
) -> (Vec<MemoryEntry>, Vec<f32>) {
    let mut entries = Vec::with_capacity(hits.len());
    let mut scores = Vec::with_capacity(hits.len());
    for ScoredObject { object, score } in hits {
        let id = object.id.clone();
        match object.into_entry() {
            Ok(entry) if keep(&entry, score) => {
                entries.push(entry);
                scores.push(score);
            }
            Ok(_) => {}
            Err(err) => warn!(id = %id, ?err, "skipping undecodable vector object"),
        }
    }
    (entries, scores)
}

impl VectorStore {
    /// Creates a store over an established collection client.
    #[must_use]
    pub fn new(config: VectorConfig, collection: Arc<dyn VectorCollection>) -> Self {
        Self {
            config,
            collection,
            embedder: None,
            schema_ready: Mutex::new(false),
            counters: StoreCounters::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a store over a fresh [`LocalVectorCollection`].
    #[must_use]
    pub fn in_process(config: VectorConfig) -> Self {
        Self::new(config, Arc::new(LocalVectorCollection::new()))
    }

    /// Attaches the provider used to embed content.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &VectorConfig {
        &self.config
    }

    /// Returns `true` when an embedding provider is attached.
    #[must_use]
    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Embeds several texts through the attached provider, preserving order.
    ///
    /// # Errors
    ///
    /// Returns [`memory_primitives::MemoryError::Embedding`] when no provider is
    /// attached, or the provider's error.
    pub async fn embed_batch(&self, texts: &[String]) -> StoreResult<Vec<EmbeddingVector>> {
        match &self.embedder {
            Some(embedder) => embedder.embed_batch(texts).await,
            None => Err(memory_primitives::MemoryError::embedding(
                "no embedding provider configured",
            )),
        }
    }

    fn class(&self) -> &str {
        &self.config.class_name
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        let mut ready = self.schema_ready.lock().await;
        if *ready {
            return Ok(());
        }
        if !self.collection.has_schema(self.class()).await? {
            self.collection
                .create_schema(self.class(), &SCHEMA_PROPERTIES)
                .await?;
            info!(class = %self.class(), "vector collection created");
        }
        *ready = true;
        Ok(())
    }

    async fn embed(&self, text: &str) -> Option<EmbeddingVector> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(text).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                warn!(?err, "embedding failed");
                None
            }
        }
    }

    async fn try_store(&self, mut entry: MemoryEntry) -> StoreResult<()> {
        self.ensure_schema().await?;
        if entry.embedding().is_none() {
            if let Some(vector) = self.embed(entry.content()).await {
                entry.set_embedding(vector);
            }
        }
        let object = VectorObject::from_entry(&entry)?;
        self.collection.upsert(self.class(), object).await
    }

    async fn try_retrieve(&self, query: &MemoryQuery) -> StoreResult<(Vec<MemoryEntry>, Vec<f32>, usize)> {
        self.ensure_schema().await?;
        // Fetch the whole candidate set so `total_count` is taken before truncation.
        let fetch = MAX_QUERY_LIMIT;
        let memory_type = query.memory_type();

        let (mut entries, mut scores) = if let Some(vector) = query.embedding() {
            let threshold = query.similarity_threshold();
            let hits = self
                .collection
                .near_vector(self.class(), vector, fetch, memory_type)
                .await?;
            collect_hits(hits, |entry, score| {
                score >= threshold && query.matches_attributes(entry, &[])
            })
        } else if let Some(text) = query.content() {
            let hits = self
                .collection
                .bm25(self.class(), text, fetch, memory_type)
                .await?;
            collect_hits(hits, |entry, _| query.matches_attributes(entry, &[]))
        } else {
            let objects = self.collection.list(self.class(), memory_type).await?;
            let hits = objects
                .into_iter()
                .map(|object| ScoredObject { object, score: 0.0 })
                .collect();
            let (mut entries, _) = collect_hits(hits, |entry, _| query.matches(entry));
            rank_entries(&mut entries);
            (entries, Vec::new())
        };

        let total = entries.len();
        entries.truncate(query.limit());
        scores.truncate(query.limit());
        Ok((entries, scores, total))
    }

    async fn try_update(&self, id: &str, patch: EntryPatch) -> StoreResult<bool> {
        self.ensure_schema().await?;
        let Some(object) = self.collection.get(self.class(), id).await? else {
            return Ok(false);
        };
        let mut entry = object.into_entry()?;
        let reembed = patch.touches_content() && !patch.sets_embedding();
        entry.apply_patch(patch);
        if reembed {
            if let Some(vector) = self.embed(entry.content()).await {
                entry.set_embedding(vector);
            }
        }
        self.collection
            .upsert(self.class(), VectorObject::from_entry(&entry)?)
            .await?;
        Ok(true)
    }

    async fn try_clear(&self, memory_type: Option<MemoryType>) -> StoreResult<usize> {
        match memory_type {
            None => {
                let removed = self.collection.count(self.class(), None).await.unwrap_or(0);
                let mut ready = self.schema_ready.lock().await;
                self.collection.delete_schema(self.class()).await?;
                self.collection
                    .create_schema(self.class(), &SCHEMA_PROPERTIES)
                    .await?;
                *ready = true;
                Ok(removed)
            }
            Some(kind) => {
                self.ensure_schema().await?;
                self.collection.delete_where_type(self.class(), kind).await
            }
        }
    }

    async fn try_search(
        &self,
        embedding: &EmbeddingVector,
        limit: usize,
        threshold: f32,
    ) -> StoreResult<(Vec<MemoryEntry>, Vec<f32>)> {
        self.ensure_schema().await?;
        let hits = self
            .collection
            .near_vector(self.class(), embedding, limit, None)
            .await?;
        Ok(collect_hits(hits, |_, score| score >= threshold))
    }

    async fn try_stats(&self) -> StoreResult<MemoryStats> {
        self.ensure_schema().await?;
        let mut entries_by_type = BTreeMap::new();
        for kind in MemoryType::ALL {
            let count = self.collection.count(self.class(), Some(kind)).await?;
            if count > 0 {
                entries_by_type.insert(kind, count);
            }
        }
        let mut stats = MemoryStats {
            total_entries: self.collection.count(self.class(), None).await?,
            entries_by_type,
            ..MemoryStats::default()
        };
        self.counters.fill(&mut stats);
        Ok(stats)
    }
}

#[async_trait]
impl MemoryStore for VectorStore {
    fn kind(&self) -> &'static str {
        "vector"
    }

    async fn initialize(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        let ready = async {
            self.collection.ready().await?;
            self.ensure_schema().await
        }
        .await;
        match ready {
            Ok(()) => {
                info!(class = %self.class(), embedder = self.has_embedder(), "vector store initialized");
                true
            }
            Err(err) => {
                warn!(?err, "vector store failed to initialize");
                false
            }
        }
    }

    async fn store(&self, entry: MemoryEntry) -> bool {
        if self.is_closed() {
            return false;
        }
        let id = entry.id().to_owned();
        let stored = logged("store", self.try_store(entry).await).is_some();
        if stored {
            self.counters.record_store();
            debug!(id = %id, "vector entry stored");
        }
        stored
    }

    async fn retrieve(&self, query: &MemoryQuery) -> MemoryResult {
        let started = Instant::now();
        if self.is_closed() {
            return MemoryResult::failed(started.elapsed());
        }
        match logged("retrieve", self.try_retrieve(query).await) {
            Some((entries, scores, total)) => {
                let elapsed = started.elapsed();
                self.counters.record_retrieval(elapsed, !entries.is_empty());
                MemoryResult::scored(entries, scores, total, elapsed)
            }
            None => MemoryResult::failed(started.elapsed()),
        }
    }

    async fn update(&self, id: &str, patch: EntryPatch) -> bool {
        if self.is_closed() {
            return false;
        }
        logged("update", self.try_update(id, patch).await).unwrap_or(false)
    }

    async fn delete(&self, id: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        let deleted = async {
            self.ensure_schema().await?;
            self.collection.delete(self.class(), id).await
        }
        .await;
        logged("delete", deleted).unwrap_or(false)
    }

    async fn clear(&self, memory_type: Option<MemoryType>) -> bool {
        if self.is_closed() {
            return false;
        }
        match logged("clear", self.try_clear(memory_type).await) {
            Some(removed) => {
                info!(memory_type = ?memory_type, removed, "vector store cleared");
                true
            }
            None => false,
        }
    }

    async fn get_stats(&self) -> StoreResult<MemoryStats> {
        self.try_stats().await
    }

    async fn health_check(&self) -> bool {
        !self.is_closed() && self.collection.ready().await.is_ok()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.collection.close().await;
        info!("vector store closed");
    }

    fn as_vector(&self) -> Option<&dyn VectorCapable> {
        Some(self)
    }
}

#[async_trait]
impl VectorCapable for VectorStore {
    async fn create_embedding(&self, text: &str) -> Option<EmbeddingVector> {
        if self.is_closed() {
            return None;
        }
        self.embed(text).await
    }

    async fn similarity_search(
        &self,
        embedding: &EmbeddingVector,
        limit: usize,
        threshold: f32,
    ) -> MemoryResult {
        let started = Instant::now();
        if self.is_closed() {
            return MemoryResult::failed(started.elapsed());
        }
        match logged("similarity search", self.try_search(embedding, limit, threshold).await) {
            Some((entries, scores)) => {
                let elapsed = started.elapsed();
                self.counters.record_retrieval(elapsed, !entries.is_empty());
                let total = entries.len();
                MemoryResult::scored(entries, scores, total, elapsed)
            }
            None => MemoryResult::failed(started.elapsed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_primitives::MemoryError;

    /// Maps text onto two axes: mentions of "rust" and everything else.
    struct AxisEmbedder;

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        async fn embed(&self, text: &str) -> StoreResult<EmbeddingVector> {
            if text.contains("fail") {
                return Err(MemoryError::embedding("refused"));
            }
            let rust = if text.contains("rust") { 1.0 } else { 0.0 };
            EmbeddingVector::new(vec![rust, 1.0 - rust])
        }
    }

    fn store() -> VectorStore {
        VectorStore::in_process(VectorConfig::default()).with_embedder(Arc::new(AxisEmbedder))
    }

    fn entry(id: &str, content: &str) -> MemoryEntry {
        MemoryEntry::builder(content, MemoryType::LongTerm)
            .id(id)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn schema_is_created_once() {
        let collection = Arc::new(LocalVectorCollection::new());
        let store = VectorStore::new(VectorConfig::default(), collection.clone());
        assert!(store.initialize().await);
        assert!(store.initialize().await);
        assert_eq!(
            collection.properties("MemoryEntry").await.unwrap(),
            SCHEMA_PROPERTIES.map(str::to_owned).to_vec()
        );
    }

    #[tokio::test]
    async fn embedding_failure_still_stores_text() {
        let store = store();
        assert!(store.store(entry("a", "this will fail to embed")).await);

        let result = store.retrieve(&MemoryQuery::new().with_content("embed")).await;
        assert_eq!(result.entries.len(), 1);
        assert!(result.entries[0].embedding().is_none());
        assert_eq!(result.similarity_scores.len(), 1);
    }

    #[tokio::test]
    async fn semantic_search_respects_threshold() {
        let store = store();
        store.store(entry("r", "rust ownership")).await;
        store.store(entry("p", "python gardening")).await;

        let vector = store.as_vector().unwrap();
        let result = vector.semantic_search("rust traits", 10, 0.9).await;
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].id(), "r");
        assert!((result.similarity_scores[0] - 1.0).abs() < 1e-6);

        let result = vector.semantic_search("rust traits", 10, 0.0).await;
        assert_eq!(result.entries.len(), 2);
    }

    #[tokio::test]
    async fn update_reembeds_changed_content() {
        let store = store();
        store.store(entry("a", "gardening tips")).await;
        assert!(store.update("a", EntryPatch::new().content("rust tips")).await);

        let query = MemoryQuery::new()
            .with_embedding(EmbeddingVector::new(vec![1.0, 0.0]).unwrap())
            .with_similarity_threshold(0.9)
            .unwrap();
        let result = store.retrieve(&query).await;
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].content(), "rust tips");
        assert!(!store.update("missing", EntryPatch::new().priority(1)).await);
    }

    #[tokio::test]
    async fn clear_by_type_and_wholesale() {
        let store = store();
        store.store(entry("a", "long")).await;
        let vector_entry = MemoryEntry::builder("vec", MemoryType::Vector)
            .id("b")
            .build()
            .unwrap();
        store.store(vector_entry).await;

        assert!(store.clear(Some(MemoryType::LongTerm)).await);
        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.entries_by_type[&MemoryType::Vector], 1);

        assert!(store.clear(None).await);
        assert_eq!(store.get_stats().await.unwrap().total_entries, 0);
        assert!(store.store(entry("c", "after clear")).await);
    }

    #[tokio::test]
    async fn unscoped_listing_ranks_by_priority() {
        let store = VectorStore::in_process(VectorConfig::default());
        let low = MemoryEntry::builder("low", MemoryType::LongTerm)
            .id("low")
            .priority(1)
            .build()
            .unwrap();
        let high = MemoryEntry::builder("high", MemoryType::LongTerm)
            .id("high")
            .priority(5)
            .build()
            .unwrap();
        store.store(low).await;
        store.store(high).await;

        let result = store.retrieve(&MemoryQuery::new().with_limit(1).unwrap()).await;
        assert_eq!(result.total_count, 2);
        assert_eq!(result.entries[0].id(), "high");
        assert!(result.similarity_scores.is_empty());
        assert!(store.create_embedding("anything").await.is_none());
    }

    #[tokio::test]
    async fn total_count_is_taken_before_truncation() {
        let store = store();
        for n in 0..5 {
            store.store(entry(&format!("pie-{n}"), "rust apple pie")).await;
        }
        store.store(entry("other", "gardening")).await;

        let keyword = store
            .retrieve(&MemoryQuery::new().with_content("apple").with_limit(2).unwrap())
            .await;
        assert_eq!(keyword.entries.len(), 2);
        assert_eq!(keyword.similarity_scores.len(), 2);
        assert_eq!(keyword.total_count, 5);

        let nearest = store
            .retrieve(
                &MemoryQuery::new()
                    .with_embedding(EmbeddingVector::new(vec![1.0, 0.0]).unwrap())
                    .with_similarity_threshold(0.9)
                    .unwrap()
                    .with_limit(2)
                    .unwrap(),
            )
            .await;
        assert_eq!(nearest.entries.len(), 2);
        assert_eq!(nearest.total_count, 5);
    }

    #[tokio::test]
    async fn outage_degrades_to_failure_values() {
        let collection = Arc::new(LocalVectorCollection::new());
        let store = VectorStore::new(VectorConfig::default(), collection.clone());
        collection.simulate_outage(true);
        assert!(!store.initialize().await);
        assert!(!store.store(entry("a", "x")).await);
        assert!(!store.retrieve(&MemoryQuery::new()).await.success);
        assert!(!store.health_check().await);
    }
}
