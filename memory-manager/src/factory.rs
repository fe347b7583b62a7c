//! Builds backends from a type tag and a configuration map.

use std::sync::Arc;

use memory_backends::{
    CacheConnection, CacheStore, LocalCacheConnection, LocalVectorCollection, ShortTermStore,
    VectorCollection, VectorStore,
};
use memory_config::{CacheConfig, ConfigMap, ShortTermConfig, StoreKind, VectorConfig};
use memory_primitives::EmbeddingProvider;
use tracing::{debug, warn};

use crate::error::{ManagerError, ManagerResult};
use crate::registry::StoreHandle;

/// Stateless backend constructor.
///
/// Networked backends need a client for their URL. `memory://` URLs get an
/// in-process client; any other URL needs a client injected with
/// [`with_cache_connection`](Self::with_cache_connection) or
/// [`with_vector_collection`](Self::with_vector_collection). An injected
/// client is used whatever the URL.
#[derive(Clone, Default)]
pub struct StoreFactory {
    cache_connection: Option<Arc<dyn CacheConnection>>,
    vector_collection: Option<Arc<dyn VectorCollection>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl std::fmt::Debug for StoreFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreFactory")
            .field("cache_connection", &self.cache_connection.is_some())
            .field("vector_collection", &self.vector_collection.is_some())
            .field("embedder", &self.embedder.is_some())
            .finish()
    }
}

impl StoreFactory {
    /// Creates a factory without injected clients.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies the client used by cache backends.
    #[must_use]
    pub fn with_cache_connection(mut self, connection: Arc<dyn CacheConnection>) -> Self {
        self.cache_connection = Some(connection);
        self
    }

    /// Supplies the client used by vector backends.
    #[must_use]
    pub fn with_vector_collection(mut self, collection: Arc<dyn VectorCollection>) -> Self {
        self.vector_collection = Some(collection);
        self
    }

    /// Supplies the embedding provider attached to vector backends.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Builds an uninitialized backend, or `None` when the tag is unknown, the
    /// configuration is invalid, or the backend's client is unavailable.
    #[must_use]
    pub fn create(&self, tag: &str, config: &ConfigMap) -> Option<StoreHandle> {
        let built = tag
            .parse::<StoreKind>()
            .map_err(|_| ManagerError::UnknownStoreType(tag.to_owned()))
            .and_then(|kind| self.build(tag, kind, config));
        match built {
            Ok(store) => Some(store),
            Err(err) => {
                warn!(tag, %err, "store factory could not build backend");
                None
            }
        }
    }

    /// Builds an uninitialized backend of `kind`; `name` only labels errors.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Config`] for an invalid configuration map and
    /// [`ManagerError::StoreUnavailable`] when no client serves the URL.
    pub fn build(&self, name: &str, kind: StoreKind, config: &ConfigMap) -> ManagerResult<StoreHandle> {
        let store: StoreHandle = match kind {
            StoreKind::ShortTerm => Arc::new(ShortTermStore::new(ShortTermConfig::from_map(config)?)),
            StoreKind::Cache => {
                let config = CacheConfig::from_map(config)?;
                let connection = self.cache_client(&config).ok_or_else(|| {
                    ManagerError::StoreUnavailable {
                        name: name.to_owned(),
                        kind,
                        reason: format!("no cache client for `{}`", config.url),
                    }
                })?;
                Arc::new(CacheStore::new(config, connection))
            }
            StoreKind::Vector => {
                let config = VectorConfig::from_map(config)?;
                let collection = self.vector_client(&config).ok_or_else(|| {
                    ManagerError::StoreUnavailable {
                        name: name.to_owned(),
                        kind,
                        reason: format!("no vector client for `{}`", config.url),
                    }
                })?;
                let store = VectorStore::new(config, collection);
                match &self.embedder {
                    Some(embedder) => Arc::new(store.with_embedder(Arc::clone(embedder))),
                    None => Arc::new(store),
                }
            }
        };
        debug!(name, %kind, "backend built");
        Ok(store)
    }

    fn cache_client(&self, config: &CacheConfig) -> Option<Arc<dyn CacheConnection>> {
        if let Some(connection) = &self.cache_connection {
            return Some(Arc::clone(connection));
        }
        config
            .is_in_process()
            .then(|| Arc::new(LocalCacheConnection::new()) as Arc<dyn CacheConnection>)
    }

    fn vector_client(&self, config: &VectorConfig) -> Option<Arc<dyn VectorCollection>> {
        if let Some(collection) = &self.vector_collection {
            return Some(Arc::clone(collection));
        }
        config
            .is_in_process()
            .then(|| Arc::new(LocalVectorCollection::new()) as Arc<dyn VectorCollection>)
    }
}
