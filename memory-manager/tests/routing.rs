use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use memory_backends::{CacheStore, ShortTermStore, VectorStore};
use memory_config::{CacheConfig, ShortTermConfig, VectorConfig};
use memory_manager::{ClearScope, ManagerError, MemoryManager, StoreOptions};
use memory_primitives::{
    EmbeddingProvider, EmbeddingVector, EntryPatch, MemoryEntry, MemoryError, MemoryQuery, MemoryResult,
    MemoryStats, MemoryStore, MemoryType, StoreResult,
};

/// Backend whose every operation fails.
struct Unreachable;

#[async_trait]
impl MemoryStore for Unreachable {
    fn kind(&self) -> &'static str {
        "unreachable"
    }

    async fn initialize(&self) -> bool {
        true
    }

    async fn store(&self, _entry: MemoryEntry) -> bool {
        false
    }

    async fn retrieve(&self, _query: &MemoryQuery) -> MemoryResult {
        MemoryResult::failed(std::time::Duration::ZERO)
    }

    async fn update(&self, _id: &str, _patch: EntryPatch) -> bool {
        false
    }

    async fn delete(&self, _id: &str) -> bool {
        false
    }

    async fn clear(&self, _memory_type: Option<MemoryType>) -> bool {
        false
    }

    async fn get_stats(&self) -> StoreResult<MemoryStats> {
        Err(MemoryError::unavailable("connection refused"))
    }

    async fn health_check(&self) -> bool {
        false
    }

    async fn close(&self) {}
}

/// Maps text mentioning "rust" onto one axis and everything else onto the other.
struct AxisEmbedder;

#[async_trait]
impl EmbeddingProvider for AxisEmbedder {
    async fn embed(&self, text: &str) -> StoreResult<EmbeddingVector> {
        let rust = if text.contains("rust") { 1.0 } else { 0.0 };
        EmbeddingVector::new(vec![rust, 1.0 - rust])
    }
}

async fn two_backend_manager() -> MemoryManager {
    let manager = MemoryManager::new();
    assert!(
        manager
            .register_store("short_term", Arc::new(ShortTermStore::new(ShortTermConfig::default())))
            .await
    );
    assert!(
        manager
            .register_store("cache", Arc::new(CacheStore::in_process(CacheConfig::default())))
            .await
    );
    manager
}

fn aged(id: &str, memory_type: MemoryType, minutes_ago: i64) -> MemoryEntry {
    MemoryEntry::builder(format!("note {id}"), memory_type)
        .id(id)
        .timestamp(Utc::now() - TimeDelta::try_minutes(minutes_ago).unwrap())
        .build()
        .unwrap()
}

#[tokio::test]
async fn fan_out_merges_by_timestamp_and_counts_the_union() {
    let manager = two_backend_manager().await;
    manager.store_entry(aged("st-old", MemoryType::ShortTerm, 40)).await.unwrap();
    manager.store_entry(aged("st-new", MemoryType::ShortTerm, 10)).await.unwrap();
    manager.store_entry(aged("c-old", MemoryType::Cache, 30)).await.unwrap();
    manager.store_entry(aged("st-mid", MemoryType::ShortTerm, 20)).await.unwrap();
    manager.store_entry(aged("c-new", MemoryType::Cache, 0)).await.unwrap();
    manager.store_entry(aged("c-mid", MemoryType::Cache, 15)).await.unwrap();

    // Each backend holds three matches, more than the limit of two.
    let result = manager.retrieve(&MemoryQuery::new().with_limit(2).unwrap()).await;
    assert!(result.success);
    assert_eq!(result.total_count, 6);
    let ids: Vec<_> = result.entries.iter().map(MemoryEntry::id).collect();
    assert_eq!(ids, ["c-new", "st-new"]);
    assert!(result.similarity_scores.is_empty());
    manager.close().await;
}

#[tokio::test]
async fn fan_out_ranks_priority_before_recency() {
    let manager = two_backend_manager().await;
    manager.store_entry(aged("recent", MemoryType::Cache, 0)).await.unwrap();
    let urgent = MemoryEntry::builder("urgent", MemoryType::ShortTerm)
        .id("urgent")
        .priority(5)
        .timestamp(Utc::now() - TimeDelta::try_minutes(50).unwrap())
        .build()
        .unwrap();
    manager.store_entry(urgent).await.unwrap();

    let result = manager.retrieve(&MemoryQuery::new()).await;
    assert_eq!(result.entries[0].id(), "urgent");
    assert_eq!(result.entries[1].id(), "recent");
    manager.close().await;
}

#[tokio::test]
async fn failing_backend_is_skipped_during_fan_out() {
    let manager = two_backend_manager().await;
    assert!(manager.register_store("remote", Arc::new(Unreachable)).await);
    manager
        .store("survives", MemoryType::ShortTerm, StoreOptions::new())
        .await
        .unwrap();

    let result = manager.retrieve(&MemoryQuery::new()).await;
    assert!(result.success);
    assert_eq!(result.total_count, 1);
    manager.close().await;
}

#[tokio::test]
async fn fan_out_fails_only_when_every_backend_fails() {
    let manager = MemoryManager::new();
    assert!(manager.register_store("a", Arc::new(Unreachable)).await);
    assert!(manager.register_store("b", Arc::new(Unreachable)).await);
    assert!(!manager.retrieve(&MemoryQuery::new()).await.success);
}

#[tokio::test]
async fn rejected_write_is_a_hard_error() {
    let manager = MemoryManager::new();
    assert!(manager.register_store("short_term", Arc::new(Unreachable)).await);

    let err = manager
        .store("lost", MemoryType::ShortTerm, StoreOptions::new().id("lost-1"))
        .await
        .expect_err("write must not be silently dropped");
    match err {
        ManagerError::StoreFailed { store, id } => {
            assert_eq!(store, "short_term");
            assert_eq!(id, "lost-1");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn delete_without_type_reaches_every_backend() {
    let manager = two_backend_manager().await;
    manager.store_entry(aged("shared", MemoryType::ShortTerm, 1)).await.unwrap();
    manager.store_entry(aged("shared", MemoryType::Cache, 1)).await.unwrap();

    assert!(manager.delete("shared", None).await);
    assert!(manager.retrieve(&MemoryQuery::new()).await.is_empty());
    assert!(!manager.delete("shared", None).await);
    manager.close().await;
}

#[tokio::test]
async fn delete_with_type_only_touches_the_mapped_backend() {
    let manager = two_backend_manager().await;
    manager.store_entry(aged("shared", MemoryType::ShortTerm, 1)).await.unwrap();
    manager.store_entry(aged("shared", MemoryType::Cache, 1)).await.unwrap();

    assert!(manager.delete("shared", Some(MemoryType::Cache)).await);
    let left = manager.retrieve(&MemoryQuery::new()).await;
    assert_eq!(left.total_count, 1);
    assert_eq!(left.entries[0].memory_type(), MemoryType::ShortTerm);
    manager.close().await;
}

#[tokio::test]
async fn update_without_type_stops_at_first_success() {
    let manager = two_backend_manager().await;
    manager.store_entry(aged("in-cache", MemoryType::Cache, 1)).await.unwrap();

    assert!(manager.update("in-cache", EntryPatch::new().priority(9), None).await);
    assert!(!manager.update("missing", EntryPatch::new().priority(9), None).await);

    let result = manager
        .retrieve(&MemoryQuery::new().with_memory_type(MemoryType::Cache))
        .await;
    assert_eq!(result.entries[0].priority(), 9);
    manager.close().await;
}

#[tokio::test]
async fn clear_scopes() {
    let manager = two_backend_manager().await;
    manager.store_entry(aged("s", MemoryType::ShortTerm, 1)).await.unwrap();
    manager.store_entry(aged("c", MemoryType::Cache, 1)).await.unwrap();

    assert!(manager.clear(ClearScope::Type(MemoryType::Cache)).await);
    let left = manager.retrieve(&MemoryQuery::new()).await;
    assert_eq!(left.total_count, 1);
    assert_eq!(left.entries[0].id(), "s");

    assert!(manager.clear(ClearScope::Store("short_term".to_owned())).await);
    assert!(manager.retrieve(&MemoryQuery::new()).await.is_empty());

    manager.store_entry(aged("c", MemoryType::Cache, 1)).await.unwrap();
    assert!(manager.clear(ClearScope::All).await);
    assert!(manager.retrieve(&MemoryQuery::new()).await.is_empty());
    manager.close().await;
}

#[tokio::test]
async fn search_similar_uses_first_vector_backend() {
    let manager = two_backend_manager().await;
    assert!(manager.search_similar("rust", 5, 0.5, None).await.is_empty());

    let vectors = VectorStore::in_process(VectorConfig::default()).with_embedder(Arc::new(AxisEmbedder));
    assert!(manager.register_store("vector_store", Arc::new(vectors)).await);
    manager
        .store("rust ownership rules", MemoryType::LongTerm, StoreOptions::new().id("r"))
        .await
        .unwrap();
    manager
        .store("gardening tips", MemoryType::LongTerm, StoreOptions::new().id("g"))
        .await
        .unwrap();

    let result = manager.search_similar("rust borrow checker", 5, 0.9, None).await;
    assert!(result.success);
    assert_eq!(result.entries.len(), 1);
    assert_eq!(result.entries[0].id(), "r");
    assert_eq!(result.similarity_scores.len(), 1);

    let by_type = manager
        .search_similar("garden", 5, 0.9, Some(MemoryType::Vector))
        .await;
    assert_eq!(by_type.entries[0].id(), "g");
    manager.close().await;
}

#[tokio::test]
async fn search_similar_on_non_vector_type_fails() {
    let manager = two_backend_manager().await;
    let result = manager
        .search_similar("anything", 5, 0.5, Some(MemoryType::ShortTerm))
        .await;
    assert!(!result.success);
    manager.close().await;
}

#[tokio::test]
async fn reports_tolerate_failing_backends() {
    let manager = two_backend_manager().await;
    assert!(manager.register_store("remote", Arc::new(Unreachable)).await);
    manager
        .store("counted", MemoryType::ShortTerm, StoreOptions::new())
        .await
        .unwrap();

    let stats = manager.get_stats().await;
    assert_eq!(stats.backends.len(), 3);
    assert_eq!(stats.failures(), 1);
    assert!(stats.backend("remote").unwrap().error.is_some());
    assert_eq!(stats.totals().total_entries, 1);

    let health = manager.health_check().await;
    assert!(!health.is_healthy());
    let unhealthy: Vec<_> = health.unhealthy().map(|backend| backend.name.as_str()).collect();
    assert_eq!(unhealthy, ["remote"]);
    manager.close().await;
}

#[tokio::test]
async fn close_is_idempotent_and_empties_the_registry() {
    let manager = two_backend_manager().await;
    manager.close().await;
    assert!(manager.store_names().is_empty());
    assert!(manager.type_mapping().is_empty());

    manager.close().await;
    assert!(manager.store_names().is_empty());
    assert!(manager.health_check().await.backends.is_empty());
}

#[tokio::test]
async fn registering_replaces_and_closes_the_previous_backend() {
    let manager = MemoryManager::new();
    let first = Arc::new(ShortTermStore::new(ShortTermConfig::default()));
    assert!(manager.register_store("short_term", first.clone()).await);
    assert!(
        manager
            .register_store("short_term", Arc::new(ShortTermStore::new(ShortTermConfig::default())))
            .await
    );

    assert_eq!(manager.store_names(), ["short_term"]);
    assert!(!first.health_check().await);
    manager.close().await;
}
