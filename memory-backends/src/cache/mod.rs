//! TTL key-value cache store with type and tag indices.
//!
//! Layout under the configured prefix:
//!
//! | key | holds |
//! |---|---|
//! | `{prefix}entry:{id}` | JSON-encoded [`MemoryEntry`] |
//! | `{prefix}type:{memory_type}` | set of entry ids |
//! | `{prefix}tag:{tag}` | set of entry ids |
//! | `{prefix}kv:{key}` | raw [`CacheValue`] written through [`KeyValueCapable`] |

mod connection;
mod local;

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use memory_config::CacheConfig;
use memory_primitives::{
    rank_entries, CacheValue, EntryPatch, KeyValueCapable, MemoryEntry, MemoryQuery, MemoryResult,
    MemoryStats, MemoryStore, MemoryType, StoreResult,
};
use tracing::{debug, info, warn};

use crate::stats::StoreCounters;

pub use connection::{CacheConnection, Expiry};
pub use local::LocalCacheConnection;

/// Memory store over a [`CacheConnection`].
pub struct CacheStore {
    config: CacheConfig,
    connection: Arc<dyn CacheConnection>,
    counters: StoreCounters,
    closed: AtomicBool,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn logged<T>(operation: &'static str, result: StoreResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(operation, ?err, "cache operation failed");
            None
        }
    }
}

impl CacheStore {
    /// Creates a store over an established connection.
    #[must_use]
    pub fn new(config: CacheConfig, connection: Arc<dyn CacheConnection>) -> Self {
        Self {
            config,
            connection,
            counters: StoreCounters::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a store over a fresh [`LocalCacheConnection`].
    #[must_use]
    pub fn in_process(config: CacheConfig) -> Self {
        Self::new(config, Arc::new(LocalCacheConnection::new()))
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn entry_key(&self, id: &str) -> String {
        format!("{}entry:{id}", self.config.key_prefix)
    }

    fn type_key(&self, memory_type: MemoryType) -> String {
        format!("{}type:{memory_type}", self.config.key_prefix)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}tag:{tag}", self.config.key_prefix)
    }

    fn kv_key(&self, key: &str) -> String {
        format!("{}kv:{key}", self.config.key_prefix)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reads an entry; malformed payloads are skipped, not fatal.
    async fn load(&self, id: &str) -> StoreResult<Option<MemoryEntry>> {
        let Some(raw) = self.connection.get(&self.entry_key(id)).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                warn!(id, ?err, "skipping malformed cache entry");
                Ok(None)
            }
        }
    }

    async fn index(&self, entry: &MemoryEntry) -> StoreResult<()> {
        self.connection
            .set_add(&self.type_key(entry.memory_type()), entry.id())
            .await?;
        for tag in entry.tags() {
            self.connection.set_add(&self.tag_key(tag), entry.id()).await?;
        }
        Ok(())
    }

    async fn unindex(&self, entry: &MemoryEntry) -> StoreResult<()> {
        self.connection
            .set_remove(&self.type_key(entry.memory_type()), entry.id())
            .await?;
        for tag in entry.tags() {
            self.connection.set_remove(&self.tag_key(tag), entry.id()).await?;
        }
        Ok(())
    }

    async fn write(&self, entry: &MemoryEntry, expiry: Expiry) -> StoreResult<()> {
        let payload = serde_json::to_vec(entry)?;
        self.connection
            .set(&self.entry_key(entry.id()), Bytes::from(payload), expiry)
            .await
    }

    async fn try_store(&self, entry: &MemoryEntry) -> StoreResult<()> {
        if let Some(previous) = self.load(entry.id()).await? {
            self.unindex(&previous).await?;
        }
        let ttl = entry.ttl().unwrap_or_else(|| self.config.default_ttl());
        self.write(entry, Expiry::After(ttl)).await?;
        self.index(entry).await
    }

    /// Resolves candidate ids through the indices, or a key scan when the
    /// query filters on neither type nor tags.
    async fn candidate_ids(&self, query: &MemoryQuery) -> StoreResult<(Vec<String>, Vec<String>)> {
        let mut index_keys = Vec::new();
        let by_type = match query.memory_type() {
            Some(kind) => {
                let key = self.type_key(kind);
                let members = self.connection.set_members(&key).await?;
                index_keys.push(key);
                Some(members)
            }
            None => None,
        };
        let by_tag = if query.tags().is_empty() {
            None
        } else {
            let keys: Vec<String> = query.tags().iter().map(|tag| self.tag_key(tag)).collect();
            let members = self.connection.set_union(&keys).await?;
            index_keys.extend(keys);
            Some(members)
        };

        let ids = match (by_type, by_tag) {
            (Some(types), Some(tags)) => {
                let tags: HashSet<String> = tags.into_iter().collect();
                types.into_iter().filter(|id| tags.contains(id)).collect()
            }
            (Some(ids), None) | (None, Some(ids)) => ids,
            (None, None) => {
                let prefix = self.entry_key("");
                self.connection
                    .keys_with_prefix(&prefix)
                    .await?
                    .into_iter()
                    .filter_map(|key| key.strip_prefix(&prefix).map(str::to_owned))
                    .collect()
            }
        };
        Ok((ids, index_keys))
    }

    async fn try_retrieve(&self, query: &MemoryQuery) -> StoreResult<(Vec<MemoryEntry>, usize)> {
        let (ids, index_keys) = self.candidate_ids(query).await?;
        let loaded = join_all(ids.iter().map(|id| self.load(id))).await;

        let mut matches = Vec::new();
        for (id, entry) in ids.iter().zip(loaded) {
            match entry? {
                Some(entry) if query.matches(&entry) => matches.push(entry),
                Some(_) => {}
                None => {
                    // The entry expired or is unreadable; drop it from the sets we consulted.
                    for key in &index_keys {
                        self.connection.set_remove(key, id).await?;
                    }
                }
            }
        }
        rank_entries(&mut matches);
        let total = matches.len();
        matches.truncate(query.limit());
        Ok((matches, total))
    }

    async fn try_update(&self, id: &str, patch: EntryPatch) -> StoreResult<bool> {
        let Some(mut entry) = self.load(id).await? else {
            return Ok(false);
        };
        self.unindex(&entry).await?;
        let expiry = patch.ttl_override().map_or(Expiry::Keep, Expiry::After);
        entry.apply_patch(patch);
        self.write(&entry, expiry).await?;
        self.index(&entry).await?;
        Ok(true)
    }

    async fn try_delete(&self, id: &str) -> StoreResult<bool> {
        if let Some(entry) = self.load(id).await? {
            self.unindex(&entry).await?;
        }
        self.connection.delete(&self.entry_key(id)).await
    }

    async fn try_clear(&self, memory_type: Option<MemoryType>) -> StoreResult<usize> {
        match memory_type {
            None => {
                let keys = self
                    .connection
                    .keys_with_prefix(&self.config.key_prefix)
                    .await?;
                for key in &keys {
                    self.connection.delete(key).await?;
                }
                Ok(keys.len())
            }
            Some(kind) => {
                let type_key = self.type_key(kind);
                let ids = self.connection.set_members(&type_key).await?;
                let mut removed = 0;
                for id in &ids {
                    if self.try_delete(id).await? {
                        removed += 1;
                    }
                }
                self.connection.delete(&type_key).await?;
                Ok(removed)
            }
        }
    }

    async fn try_stats(&self) -> StoreResult<MemoryStats> {
        let total_entries = self
            .connection
            .keys_with_prefix(&self.entry_key(""))
            .await?
            .len();
        let mut entries_by_type = BTreeMap::new();
        for kind in MemoryType::ALL {
            let type_key = self.type_key(kind);
            let mut count = 0;
            for id in self.connection.set_members(&type_key).await? {
                if self.connection.exists(&self.entry_key(&id)).await? {
                    count += 1;
                } else {
                    self.connection.set_remove(&type_key, &id).await?;
                }
            }
            if count > 0 {
                entries_by_type.insert(kind, count);
            }
        }
        let mut stats = MemoryStats {
            total_entries,
            memory_usage: self.connection.used_memory().await?.unwrap_or(0),
            entries_by_type,
            ..MemoryStats::default()
        };
        self.counters.fill(&mut stats);
        Ok(stats)
    }
}

#[async_trait]
impl MemoryStore for CacheStore {
    fn kind(&self) -> &'static str {
        "cache"
    }

    async fn initialize(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.connection.ping().await {
            Ok(()) => {
                info!(prefix = %self.config.key_prefix, "cache store initialized");
                true
            }
            Err(err) => {
                warn!(?err, "cache service did not answer ping");
                false
            }
        }
    }

    async fn store(&self, entry: MemoryEntry) -> bool {
        if self.is_closed() {
            return false;
        }
        let stored = logged("store", self.try_store(&entry).await).is_some();
        if stored {
            self.counters.record_store();
            debug!(id = %entry.id(), "cache entry stored");
        }
        stored
    }

    async fn retrieve(&self, query: &MemoryQuery) -> MemoryResult {
        let started = Instant::now();
        if self.is_closed() {
            return MemoryResult::failed(started.elapsed());
        }
        match logged("retrieve", self.try_retrieve(query).await) {
            Some((entries, total)) => {
                let elapsed = started.elapsed();
                self.counters.record_retrieval(elapsed, !entries.is_empty());
                MemoryResult::found(entries, total, elapsed)
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
        logged("delete", self.try_delete(id).await).unwrap_or(false)
    }

    async fn clear(&self, memory_type: Option<MemoryType>) -> bool {
        if self.is_closed() {
            return false;
        }
        match logged("clear", self.try_clear(memory_type).await) {
            Some(removed) => {
                info!(memory_type = ?memory_type, removed, "cache store cleared");
                true
            }
            None => false,
        }
    }

    async fn get_stats(&self) -> StoreResult<MemoryStats> {
        self.try_stats().await
    }

    async fn health_check(&self) -> bool {
        !self.is_closed() && self.connection.ping().await.is_ok()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.connection.close().await;
        info!("cache store closed");
    }

    fn as_key_value(&self) -> Option<&dyn KeyValueCapable> {
        Some(self)
    }
}

#[async_trait]
impl KeyValueCapable for CacheStore {
    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> bool {
        if self.is_closed() {
            return false;
        }
        let Some(encoded) = logged("kv encode", value.encode()) else {
            return false;
        };
        let expiry = Expiry::After(ttl.unwrap_or_else(|| self.config.default_ttl()));
        let written = logged(
            "kv set",
            self.connection
                .set(&self.kv_key(key), Bytes::from(encoded), expiry)
                .await,
        )
        .is_some();
        if written {
            self.counters.record_store();
        }
        written
    }

    async fn get(&self, key: &str) -> Option<CacheValue> {
        if self.is_closed() {
            return None;
        }
        let raw = logged("kv get", self.connection.get(&self.kv_key(key)).await)?;
        self.counters.record_get(raw.is_some());
        raw.map(|bytes| CacheValue::decode(&bytes))
    }

    async fn exists(&self, key: &str) -> bool {
        !self.is_closed()
            && logged("kv exists", self.connection.exists(&self.kv_key(key)).await).unwrap_or(false)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> bool {
        !self.is_closed()
            && logged("kv expire", self.connection.expire(&self.kv_key(key), ttl).await)
                .unwrap_or(false)
    }

    async fn ttl(&self, key: &str) -> Option<Duration> {
        if self.is_closed() {
            return None;
        }
        logged("kv ttl", self.connection.ttl(&self.kv_key(key)).await).flatten()
    }

    async fn delete_key(&self, key: &str) -> bool {
        !self.is_closed()
            && logged("kv delete", self.connection.delete(&self.kv_key(key)).await).unwrap_or(false)
    }
}
