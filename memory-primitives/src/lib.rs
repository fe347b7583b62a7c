//! Core shared types and traits for the memory subsystem.
//!
//! Every backend speaks in terms of [`MemoryEntry`], [`MemoryQuery`] and
//! [`MemoryResult`], and implements the [`MemoryStore`] contract. Backends
//! with vector or raw key-value support additionally expose
//! [`VectorCapable`] / [`KeyValueCapable`] through the probing methods on
//! [`MemoryStore`].

#![warn(missing_docs, clippy::pedantic)]

mod embeddings;
mod entry;
mod error;
mod query;
mod result;
mod store;

/// Embedding vectors and the injected embedding provider interface.
pub use embeddings::{EmbeddingProvider, EmbeddingVector, cosine_similarity};
/// Memory records and their routing categories.
pub use entry::{EntryPatch, MemoryEntry, MemoryEntryBuilder, MemoryType};
/// Error type and result alias shared by all backends.
pub use error::{MemoryError, StoreResult};
/// Filters and limits consumed by [`MemoryStore::retrieve`].
pub use query::{
    CONTEXT_WINDOW_KEY, DEFAULT_QUERY_LIMIT, DEFAULT_SIMILARITY_THRESHOLD, MAX_QUERY_LIMIT, MemoryQuery, TimeRange,
};
/// Query results and statistics snapshots.
pub use result::{MemoryResult, MemoryStats, rank_entries};
/// Store contract and optional capabilities.
pub use store::{CacheValue, KeyValueCapable, MemoryStore, VectorCapable};
