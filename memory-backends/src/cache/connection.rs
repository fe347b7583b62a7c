//! Connection surface of the key-value cache service.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use memory_primitives::StoreResult;

/// Expiry applied by a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Expire after the given duration.
    After(Duration),
    /// Keep whatever expiry the key already has (none for new keys).
    Keep,
    /// Never expire.
    Never,
}

/// Commands the cache store needs from its service.
///
/// Errors are reported as [`memory_primitives::MemoryError`]; the store turns
/// them into `false` or unsuccessful results.
#[async_trait]
pub trait CacheConnection: Send + Sync {
    /// Round-trips a no-op command.
    async fn ping(&self) -> StoreResult<()>;

    /// Reads a plain value.
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Writes a plain value.
    async fn set(&self, key: &str, value: Bytes, expiry: Expiry) -> StoreResult<()>;

    /// Removes a key of any kind; `false` when absent.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Returns `true` when the key exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Sets the expiry of an existing key; `false` when absent.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remaining lifetime of a key, `None` when absent or persistent.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Adds `member` to the set under `key`.
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()>;

    /// Removes `member` from the set under `key`.
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()>;

    /// Members of the set under `key`, empty when absent.
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Union of the sets under `keys`, without duplicates.
    async fn set_union(&self, keys: &[String]) -> StoreResult<Vec<String>> {
        let mut union = Vec::new();
        for key in keys {
            for member in self.set_members(key).await? {
                if !union.contains(&member) {
                    union.push(member);
                }
            }
        }
        Ok(union)
    }

    /// Every live key starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Memory the service reports using, when it reports it.
    async fn used_memory(&self) -> StoreResult<Option<u64>>;

    /// Releases the connection.
    async fn close(&self);
}
