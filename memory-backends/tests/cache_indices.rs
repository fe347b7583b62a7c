use std::sync::Arc;
use std::time::Duration;

use memory_backends::{CacheConnection, CacheStore, LocalCacheConnection};
use memory_config::CacheConfig;
use memory_primitives::{
    CacheValue, EntryPatch, MemoryEntry, MemoryQuery, MemoryStore, MemoryType,
};
use serde_json::json;

fn tagged(id: &str, tags: &[&str]) -> MemoryEntry {
    MemoryEntry::builder(format!("entry {id}"), MemoryType::Cache)
        .id(id)
        .tags(tags.iter().copied())
        .unwrap()
        .build()
        .unwrap()
}

async fn ids_for(store: &CacheStore, tags: &[&str]) -> Vec<String> {
    let mut ids: Vec<String> = store
        .retrieve(&MemoryQuery::new().with_tags(tags.iter().copied()))
        .await
        .entries
        .iter()
        .map(|entry| entry.id().to_owned())
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn tag_indices_follow_or_semantics_and_deletes() {
    let store = CacheStore::in_process(CacheConfig::default());
    assert!(store.initialize().await);
    assert!(store.store(tagged("e", &["a", "b"])).await);
    assert!(store.store(tagged("other", &["z"])).await);

    assert_eq!(ids_for(&store, &["a"]).await, ["e"]);
    assert_eq!(ids_for(&store, &["b"]).await, ["e"]);
    assert_eq!(ids_for(&store, &["a", "c"]).await, ["e"]);
    assert_eq!(ids_for(&store, &["a", "z"]).await, ["e", "other"]);

    assert!(store.delete("e").await);
    assert!(ids_for(&store, &["a"]).await.is_empty());
    assert!(ids_for(&store, &["b"]).await.is_empty());
    assert!(!store.delete("e").await);
}

#[tokio::test]
async fn index_keys_use_the_configured_prefix() {
    let connection = Arc::new(LocalCacheConnection::new());
    let config = CacheConfig {
        key_prefix: "app:".into(),
        ..CacheConfig::default()
    };
    let store = CacheStore::new(config, connection.clone());
    store.store(tagged("e", &["a"])).await;

    assert!(connection.exists("app:entry:e").await.unwrap());
    assert_eq!(connection.set_members("app:type:cache").await.unwrap(), ["e"]);
    assert_eq!(connection.set_members("app:tag:a").await.unwrap(), ["e"]);
}

#[tokio::test(start_paused = true)]
async fn entries_expire_with_their_ttl() {
    let store = CacheStore::in_process(CacheConfig::default());
    let entry = MemoryEntry::builder("ephemeral", MemoryType::Cache)
        .id("t")
        .ttl_secs(30)
        .tag("tmp")
        .unwrap()
        .build()
        .unwrap();
    store.store(entry).await;

    tokio::time::advance(Duration::from_secs(29)).await;
    assert_eq!(ids_for(&store, &["tmp"]).await, ["t"]);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(ids_for(&store, &["tmp"]).await.is_empty());
    assert!(store.retrieve(&MemoryQuery::new()).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stats_count_only_live_entries_per_type() {
    let connection = Arc::new(LocalCacheConnection::new());
    let store = CacheStore::new(CacheConfig::default(), connection.clone());
    let short_lived = MemoryEntry::builder("gone soon", MemoryType::Cache)
        .id("short")
        .ttl_secs(10)
        .build()
        .unwrap();
    store.store(short_lived).await;
    store.store(tagged("kept", &["x"])).await;

    tokio::time::advance(Duration::from_secs(11)).await;
    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.entries_by_type[&MemoryType::Cache], 1);
    assert_eq!(connection.set_members("memory:type:cache").await.unwrap(), ["kept"]);
}

#[tokio::test(start_paused = true)]
async fn update_keeps_ttl_unless_patched() {
    let connection = Arc::new(LocalCacheConnection::new());
    let store = CacheStore::new(CacheConfig::default(), connection.clone());
    store.store(tagged("u", &["x"])).await;

    tokio::time::advance(Duration::from_secs(100)).await;
    assert!(store.update("u", EntryPatch::new().tags(["y"])).await);
    assert_eq!(
        connection.ttl("memory:entry:u").await.unwrap(),
        Some(Duration::from_secs(3500))
    );
    assert!(ids_for(&store, &["x"]).await.is_empty());
    assert_eq!(ids_for(&store, &["y"]).await, ["u"]);

    assert!(store.update("u", EntryPatch::new().ttl(Duration::from_secs(10))).await);
    assert_eq!(
        connection.ttl("memory:entry:u").await.unwrap(),
        Some(Duration::from_secs(10))
    );
    assert!(!store.update("missing", EntryPatch::new().priority(3)).await);
}

#[tokio::test(start_paused = true)]
async fn key_value_ttl_and_expire() {
    let store = CacheStore::in_process(CacheConfig::default());
    let kv = store.as_key_value().unwrap();

    assert!(kv.set("token", CacheValue::Json(json!("abc")), Some(Duration::from_secs(60))).await);
    assert_eq!(kv.ttl("token").await, Some(Duration::from_secs(60)));
    assert!(kv.expire("token", Duration::from_secs(5)).await);

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(!kv.exists("token").await);
    assert!(!kv.expire("token", Duration::from_secs(5)).await);

    assert!(kv.set("defaulted", CacheValue::Json(json!(1)), None).await);
    assert_eq!(kv.ttl("defaulted").await, Some(Duration::from_secs(3600)));
}

#[tokio::test]
async fn round_trip_preserves_every_field() {
    let store = CacheStore::in_process(CacheConfig::default());
    let original = MemoryEntry::builder("cached answer", MemoryType::Cache)
        .metadata("query", "weather")
        .priority(4)
        .ttl_secs(120)
        .tag("answers")
        .unwrap()
        .build()
        .unwrap();
    store.store(original.clone()).await;

    let result = store
        .retrieve(&MemoryQuery::new().with_metadata("query", "weather"))
        .await;
    assert_eq!(result.entries, [original]);
    assert_eq!(result.total_count, 1);
}
