//! Configuration for memory backends and the memory manager.
//!
//! Backends are configured from a string-keyed configuration map (the same
//! shape the factory receives); the manager reads a JSON document listing
//! stores and type-mapping overrides.

#![warn(missing_docs, clippy::pedantic)]

mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigMap, load_manager_config};
pub use schema::{
    CacheConfig, IN_PROCESS_URL, ManagerConfig, ShortTermConfig, StoreKind, StoreSpec, VectorConfig,
};
