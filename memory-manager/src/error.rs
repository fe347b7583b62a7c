//! Error types surfaced by the memory manager.

use memory_config::{ConfigError, StoreKind};
use memory_primitives::{MemoryError, MemoryType};
use thiserror::Error;

/// Result alias used by the manager.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors the manager surfaces to callers.
///
/// Reads degrade to empty results instead; only writes and configuration fail loudly.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The resolved backend reported that it did not persist the entry.
    #[error("store `{store}` failed to persist entry `{id}`")]
    StoreFailed {
        /// Backend the write was routed to.
        store: String,
        /// Id of the entry that was not written.
        id: String,
    },

    /// No backend is registered under the name.
    #[error("no store registered under `{0}`")]
    UnknownStore(String),

    /// No backend is mapped to the memory type.
    #[error("no store mapped for memory type `{0}`")]
    UnmappedType(MemoryType),

    /// The factory does not know the type tag.
    #[error("unknown store type `{0}`")]
    UnknownStoreType(String),

    /// A backend could not be built because a dependency is missing.
    #[error("store `{name}` ({kind}) is unavailable: {reason}")]
    StoreUnavailable {
        /// Registry name from the configuration.
        name: String,
        /// Backend kind.
        kind: StoreKind,
        /// What is missing.
        reason: String,
    },

    /// Configuration failed to parse or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The entry could not be built.
    #[error(transparent)]
    Entry(#[from] MemoryError),
}
