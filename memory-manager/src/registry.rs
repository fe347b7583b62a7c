//! Name-to-backend registry and memory-type routing table.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use memory_primitives::{MemoryStore, MemoryType};

use crate::error::{ManagerError, ManagerResult};

/// Shared handle to a registered backend.
pub type StoreHandle = Arc<dyn MemoryStore>;

/// Routing used until overridden: short-term and cache by name, long-term and
/// vector entries both to `vector_store`.
#[must_use]
pub fn default_type_mapping() -> BTreeMap<MemoryType, String> {
    BTreeMap::from([
        (MemoryType::ShortTerm, "short_term".to_owned()),
        (MemoryType::LongTerm, "vector_store".to_owned()),
        (MemoryType::Cache, "cache".to_owned()),
        (MemoryType::Vector, "vector_store".to_owned()),
    ])
}

#[derive(Default)]
struct Inner {
    stores: Vec<(String, StoreHandle)>,
    type_mapping: BTreeMap<MemoryType, String>,
}

/// Backends in registration order plus the type mapping.
///
/// Intended to be filled during setup and read afterwards; readers receive
/// cloned handles so no lock is held across an await.
pub struct StoreRegistry {
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("stores", &self.names())
            .field("type_mapping", &self.type_mapping())
            .finish()
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreRegistry {
    /// Creates an empty registry with the default type mapping.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                stores: Vec::new(),
                type_mapping: default_type_mapping(),
            }),
        }
    }

    /// Registers `store` under `name`, replacing (in place) any previous
    /// backend with that name. Returns the replaced backend.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn insert(&self, name: impl Into<String>, store: StoreHandle) -> Option<StoreHandle> {
        let name = name.into();
        let mut inner = self.inner.write().expect("store registry poisoned");
        if let Some(slot) = inner.stores.iter_mut().find(|(existing, _)| *existing == name) {
            return Some(std::mem::replace(&mut slot.1, store));
        }
        inner.stores.push((name, store));
        None
    }

    /// Returns the backend registered under `name`.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<StoreHandle> {
        let inner = self.inner.read().expect("store registry poisoned");
        inner
            .stores
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, store)| Arc::clone(store))
    }

    /// Resolves the backend mapped to `memory_type`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::UnmappedType`] when no name is mapped, or
    /// [`ManagerError::UnknownStore`] when the mapped name is not registered.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn resolve(&self, memory_type: MemoryType) -> ManagerResult<(String, StoreHandle)> {
        let name = self
            .inner
            .read()
            .expect("store registry poisoned")
            .type_mapping
            .get(&memory_type)
            .cloned()
            .ok_or(ManagerError::UnmappedType(memory_type))?;
        let store = self
            .get(&name)
            .ok_or_else(|| ManagerError::UnknownStore(name.clone()))?;
        Ok((name, store))
    }

    /// Routes `memory_type` to the backend registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::UnknownStore`] when `name` is not registered.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn set_type_mapping(&self, memory_type: MemoryType, name: &str) -> ManagerResult<()> {
        let mut inner = self.inner.write().expect("store registry poisoned");
        if !inner.stores.iter().any(|(existing, _)| existing == name) {
            return Err(ManagerError::UnknownStore(name.to_owned()));
        }
        inner.type_mapping.insert(memory_type, name.to_owned());
        Ok(())
    }

    /// Copy of the type mapping.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn type_mapping(&self) -> BTreeMap<MemoryType, String> {
        self.inner
            .read()
            .expect("store registry poisoned")
            .type_mapping
            .clone()
    }

    /// Registered names in registration order.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("store registry poisoned")
            .stores
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Handles to every backend in registration order.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, StoreHandle)> {
        self.inner.read().expect("store registry poisoned").stores.clone()
    }

    /// Empties both the backend list and the type mapping, returning the backends.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn drain(&self) -> Vec<(String, StoreHandle)> {
        let mut inner = self.inner.write().expect("store registry poisoned");
        inner.type_mapping.clear();
        std::mem::take(&mut inner.stores)
    }

    /// Returns `true` when no backend is registered.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().expect("store registry poisoned").stores.is_empty()
    }
}
