//! Routing front door over the registered backends.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use futures::future::join_all;
use memory_config::ManagerConfig;
use memory_primitives::{
    EmbeddingVector, EntryPatch, MemoryEntry, MemoryQuery, MemoryResult, MemoryType, rank_entries,
};
use memory_telemetry::{BackendHealth, BackendStats, HealthReport, StatsReport};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{ManagerError, ManagerResult};
use crate::factory::StoreFactory;
use crate::registry::{StoreHandle, StoreRegistry};

/// Optional fields for [`MemoryManager::store`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    id: Option<String>,
    metadata: Map<String, Value>,
    tags: Vec<String>,
    priority: i32,
    ttl: Option<Duration>,
    embedding: Option<EmbeddingVector>,
}

impl StoreOptions {
    /// Creates empty options; the entry gets a generated id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `id` instead of a generated one.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Adds tags.
    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the time-to-live.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Attaches a precomputed embedding.
    #[must_use]
    pub fn embedding(mut self, embedding: EmbeddingVector) -> Self {
        self.embedding = Some(embedding);
        self
    }

    fn into_entry(self, content: String, memory_type: MemoryType) -> ManagerResult<MemoryEntry> {
        let mut builder = MemoryEntry::builder(content, memory_type)
            .merge_metadata(self.metadata)
            .priority(self.priority)
            .tags(self.tags)?;
        if let Some(id) = self.id {
            builder = builder.id(id);
        }
        if let Some(ttl) = self.ttl {
            builder = builder.ttl(ttl);
        }
        if let Some(embedding) = self.embedding {
            builder = builder.embedding(embedding);
        }
        Ok(builder.build()?)
    }
}

/// Which backends [`MemoryManager::clear`] empties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearScope {
    /// Every entry of the backend registered under the name.
    Store(String),
    /// Entries of one memory type, on every backend.
    Type(MemoryType),
    /// Every entry on every backend.
    All,
}

/// Single entry point routing memory operations to registered backends.
///
/// Writes go to the backend mapped to the entry's [`MemoryType`]. Reads
/// without a memory type fan out to every backend and merge the results.
#[derive(Debug, Default)]
pub struct MemoryManager {
    registry: StoreRegistry,
}

impl MemoryManager {
    /// Creates a manager with no backends and the default type mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds, initializes and registers every configured backend, then
    /// applies the configured type-mapping overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Config`] for an invalid configuration and
    /// [`ManagerError::StoreUnavailable`] when a backend cannot be built or
    /// fails to initialize. Backends registered before the failure are closed.
    pub async fn from_config(config: &ManagerConfig, factory: &StoreFactory) -> ManagerResult<Self> {
        config.validate()?;
        let manager = Self::new();
        if let Err(err) = manager.register_configured(config, factory).await {
            manager.close().await;
            return Err(err);
        }
        info!(stores = ?manager.store_names(), "memory manager configured");
        Ok(manager)
    }

    async fn register_configured(&self, config: &ManagerConfig, factory: &StoreFactory) -> ManagerResult<()> {
        for spec in &config.stores {
            let store = factory.build(&spec.name, spec.kind, &spec.config)?;
            if !self.register_store(spec.name.clone(), store).await {
                return Err(ManagerError::StoreUnavailable {
                    name: spec.name.clone(),
                    kind: spec.kind,
                    reason: "initialization failed".to_owned(),
                });
            }
        }
        for (memory_type, name) in config.type_overrides()? {
            self.set_type_mapping(memory_type, &name)?;
        }
        Ok(())
    }

    /// Initializes `store` and registers it under `name`, replacing and
    /// closing any backend previously registered under that name.
    ///
    /// Returns `false` (and registers nothing) when initialization fails.
    pub async fn register_store(&self, name: impl Into<String>, store: StoreHandle) -> bool {
        let name = name.into();
        if !store.initialize().await {
            warn!(store = %name, kind = store.kind(), "backend failed to initialize");
            return false;
        }
        let kind = store.kind();
        if let Some(previous) = self.registry.insert(name.clone(), store) {
            previous.close().await;
            info!(store = %name, "replaced registered backend");
        }
        info!(store = %name, kind, "backend registered");
        true
    }

    /// Routes `memory_type` to the backend registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::UnknownStore`] when `name` is not registered.
    pub fn set_type_mapping(&self, memory_type: MemoryType, name: &str) -> ManagerResult<()> {
        self.registry.set_type_mapping(memory_type, name)?;
        debug!(%memory_type, store = name, "type mapping updated");
        Ok(())
    }

    /// Returns the backend registered under `name`.
    #[must_use]
    pub fn get_store(&self, name: &str) -> Option<StoreHandle> {
        self.registry.get(name)
    }

    /// Registered backend names in registration order.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Current `memory type -> backend name` routing.
    #[must_use]
    pub fn type_mapping(&self) -> BTreeMap<MemoryType, String> {
        self.registry.type_mapping()
    }

    /// Builds an entry from `content` and `options` and writes it to the
    /// backend mapped to `memory_type`. Returns the entry id.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Entry`] when the options produce an invalid
    /// entry, a routing error when no backend serves `memory_type`, and
    /// [`ManagerError::StoreFailed`] when the backend does not persist it.
    pub async fn store(
        &self,
        content: impl Into<String>,
        memory_type: MemoryType,
        options: StoreOptions,
    ) -> ManagerResult<String> {
        let entry = options.into_entry(content.into(), memory_type)?;
        self.store_entry(entry).await
    }

    /// Writes a prebuilt entry to the backend mapped to its memory type.
    ///
    /// # Errors
    ///
    /// Returns a routing error when no backend serves the entry's type and
    /// [`ManagerError::StoreFailed`] when the backend does not persist it.
    pub async fn store_entry(&self, entry: MemoryEntry) -> ManagerResult<String> {
        let (name, store) = self.registry.resolve(entry.memory_type())?;
        let id = entry.id().to_owned();
        if !store.store(entry).await {
            warn!(store = %name, %id, "backend rejected write");
            return Err(ManagerError::StoreFailed { store: name, id });
        }
        debug!(store = %name, %id, "entry stored");
        Ok(id)
    }

    /// Runs `query` against the backend mapped to its memory type, or
    /// against every backend when it names none.
    ///
    /// Fan-out results are ranked by priority then timestamp, both
    /// descending, and truncated to the query limit; `total_count` sums every
    /// backend's match count before truncation. Backends that fail are
    /// skipped, and the result is unsuccessful only when every backend failed.
    pub async fn retrieve(&self, query: &MemoryQuery) -> MemoryResult {
        let started = Instant::now();
        let Some(memory_type) = query.memory_type() else {
            return self.fan_out(query, started).await;
        };
        match self.registry.resolve(memory_type) {
            Ok((_, store)) => store.retrieve(query).await,
            Err(err) => {
                warn!(%memory_type, %err, "retrieve could not be routed");
                MemoryResult::failed(started.elapsed())
            }
        }
    }

    async fn fan_out(&self, query: &MemoryQuery, started: Instant) -> MemoryResult {
        let stores = self.registry.snapshot();
        if stores.is_empty() {
            return MemoryResult::empty();
        }
        let results = join_all(stores.iter().map(|(_, store)| store.retrieve(query))).await;

        let mut failures = 0;
        let mut total_count = 0;
        let mut merged = Vec::new();
        for ((name, _), result) in stores.iter().zip(results) {
            if result.success {
                total_count += result.total_count;
                merged.extend(result.entries);
            } else {
                failures += 1;
                warn!(store = %name, "backend failed during fan-out retrieve");
            }
        }
        if failures == stores.len() {
            return MemoryResult::failed(started.elapsed());
        }

        rank_entries(&mut merged);
        merged.truncate(query.limit());
        debug!(backends = stores.len(), failures, total_count, "fan-out retrieve merged");
        MemoryResult::found(merged, total_count, started.elapsed())
    }

    /// Embeds `content` through a vector-capable backend and returns its
    /// nearest neighbours.
    ///
    /// The backend mapped to `memory_type` is used when given; otherwise the
    /// first vector-capable backend in registration order. The result is
    /// unsuccessful when no such backend exists.
    pub async fn search_similar(
        &self,
        content: &str,
        limit: usize,
        threshold: f32,
        memory_type: Option<MemoryType>,
    ) -> MemoryResult {
        let started = Instant::now();
        let candidate = match memory_type {
            Some(memory_type) => match self.registry.resolve(memory_type) {
                Ok(found) => Some(found),
                Err(err) => {
                    warn!(%memory_type, %err, "similarity search could not be routed");
                    None
                }
            },
            None => self
                .registry
                .snapshot()
                .into_iter()
                .find(|(_, store)| store.as_vector().is_some()),
        };

        let Some((name, store)) = candidate else {
            return MemoryResult::failed(started.elapsed());
        };
        let Some(vector) = store.as_vector() else {
            warn!(store = %name, "backend does not support similarity search");
            return MemoryResult::failed(started.elapsed());
        };
        vector.semantic_search(content, limit, threshold).await
    }

    /// Applies `patch` to the entry with `id`.
    ///
    /// With a memory type only the mapped backend is tried; otherwise
    /// backends are tried in registration order until one succeeds.
    pub async fn update(&self, id: &str, patch: EntryPatch, memory_type: Option<MemoryType>) -> bool {
        if let Some(memory_type) = memory_type {
            return match self.registry.resolve(memory_type) {
                Ok((_, store)) => store.update(id, patch).await,
                Err(err) => {
                    warn!(%memory_type, id, %err, "update could not be routed");
                    false
                }
            };
        }
        for (name, store) in self.registry.snapshot() {
            if store.update(id, patch.clone()).await {
                debug!(store = %name, id, "entry updated");
                return true;
            }
        }
        false
    }

    /// Deletes the entry with `id`.
    ///
    /// With a memory type only the mapped backend is tried; otherwise every
    /// backend is tried, since an id may live in several. Returns `true` when
    /// any backend deleted it.
    pub async fn delete(&self, id: &str, memory_type: Option<MemoryType>) -> bool {
        if let Some(memory_type) = memory_type {
            return match self.registry.resolve(memory_type) {
                Ok((_, store)) => store.delete(id).await,
                Err(err) => {
                    warn!(%memory_type, id, %err, "delete could not be routed");
                    false
                }
            };
        }
        let mut deleted = false;
        for (name, store) in self.registry.snapshot() {
            if store.delete(id).await {
                debug!(store = %name, id, "entry deleted");
                deleted = true;
            }
        }
        deleted
    }

    /// Empties the backends selected by `scope`; `true` when all of them
    /// succeeded.
    pub async fn clear(&self, scope: ClearScope) -> bool {
        match scope {
            ClearScope::Store(name) => match self.registry.get(&name) {
                Some(store) => store.clear(None).await,
                None => {
                    warn!(store = %name, "clear targets an unregistered backend");
                    false
                }
            },
            ClearScope::Type(memory_type) => {
                let stores = self.registry.snapshot();
                let outcomes =
                    join_all(stores.iter().map(|(_, store)| store.clear(Some(memory_type)))).await;
                outcomes.into_iter().all(|cleared| cleared)
            }
            ClearScope::All => {
                let stores = self.registry.snapshot();
                let outcomes = join_all(stores.iter().map(|(_, store)| store.clear(None))).await;
                let cleared = outcomes.into_iter().all(|cleared| cleared);
                info!(backends = stores.len(), cleared, "cleared all backends");
                cleared
            }
        }
    }

    /// Collects statistics from every backend; a failing backend is reported
    /// with its error.
    pub async fn get_stats(&self) -> StatsReport {
        let stores = self.registry.snapshot();
        let stats = join_all(stores.iter().map(|(_, store)| store.get_stats())).await;
        let backends = stores
            .iter()
            .zip(stats)
            .map(|((name, store), stats)| match stats {
                Ok(stats) => BackendStats::reported(name, store.kind(), stats),
                Err(err) => BackendStats::failed(name, store.kind(), err.to_string()),
            })
            .collect();
        StatsReport::new(backends)
    }

    /// Checks every backend's health.
    pub async fn health_check(&self) -> HealthReport {
        let stores = self.registry.snapshot();
        let checks = join_all(stores.iter().map(|(_, store)| store.health_check())).await;
        let backends = stores
            .iter()
            .zip(checks)
            .map(|((name, store), healthy)| {
                if healthy {
                    BackendHealth::healthy(name, store.kind())
                } else {
                    BackendHealth::unhealthy(name, store.kind(), "health check failed")
                }
            })
            .collect();
        let report = HealthReport::new(backends);
        if !report.is_healthy() {
            warn!(unhealthy = report.unhealthy().count(), "memory backends unhealthy");
        }
        report
    }

    /// Closes every backend and empties the registry. Safe to call repeatedly.
    pub async fn close(&self) {
        let stores = self.registry.drain();
        if stores.is_empty() {
            return;
        }
        join_all(stores.iter().map(|(_, store)| store.close())).await;
        info!(backends = stores.len(), "memory manager closed");
    }
}
