//! Memory backends implementing the [`MemoryStore`](memory_primitives::MemoryStore) contract.
//!
//! * [`short_term`] – bounded in-process store organised into LRU context
//!   windows, with a background expiry sweep.
//! * [`cache`] – TTL key-value cache over a [`CacheConnection`](cache::CacheConnection),
//!   with type and tag indices.
//! * [`vector`] – schema-managed similarity store over a
//!   [`VectorCollection`](vector::VectorCollection).
//!
//! The networked backends talk to their service through a small trait; an
//! in-process implementation of each ships here for `memory://` URLs and tests.

#![warn(missing_docs, clippy::pedantic)]

pub mod cache;
pub mod short_term;
pub mod vector;

mod stats;
mod window;

pub use cache::{CacheConnection, CacheStore, Expiry, LocalCacheConnection};
pub use short_term::{ShortTermStore, SweepReport, DEFAULT_WINDOW, WINDOW_SIZE_KEY};
pub use vector::{
    LocalVectorCollection, ScoredObject, VectorCollection, VectorObject, VectorStore,
    SCHEMA_PROPERTIES,
};
