//! In-process cache connection used for `memory://` URLs and tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use memory_primitives::{MemoryError, StoreResult};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::connection::{CacheConnection, Expiry};

#[derive(Debug, Clone)]
enum Data {
    Value(Bytes),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    data: Data,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }

    fn size(&self) -> usize {
        match &self.data {
            Data::Value(bytes) => bytes.len(),
            Data::Set(members) => members.iter().map(String::len).sum(),
        }
    }
}

/// Cache connection backed by a process-local map.
///
/// Expiry follows the tokio clock, so tests can drive it with a paused
/// runtime. Expired keys are dropped lazily on access.
#[derive(Debug, Default)]
pub struct LocalCacheConnection {
    slots: Mutex<HashMap<String, Slot>>,
    offline: AtomicBool,
    closed: AtomicBool,
}

impl LocalCacheConnection {
    /// Creates an empty connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every command fail as if the service were unreachable.
    pub fn simulate_outage(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    fn check(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MemoryError::Closed);
        }
        if self.offline.load(Ordering::Acquire) {
            return Err(MemoryError::unavailable("cache service unreachable"));
        }
        Ok(())
    }
}

fn live<'a>(slots: &'a mut HashMap<String, Slot>, key: &str, now: Instant) -> Option<&'a mut Slot> {
    if slots.get(key).is_some_and(|slot| !slot.is_live(now)) {
        slots.remove(key);
    }
    slots.get_mut(key)
}

fn wrong_type(key: &str) -> MemoryError {
    MemoryError::backend(format!("key `{key}` holds the wrong kind of value"))
}

#[async_trait]
impl CacheConnection for LocalCacheConnection {
    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.check()?;
        let mut slots = self.slots.lock().await;
        match live(&mut slots, key, Instant::now()) {
            None => Ok(None),
            Some(Slot {
                data: Data::Value(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: Bytes, expiry: Expiry) -> StoreResult<()> {
        self.check()?;
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        let expires_at = match expiry {
            Expiry::After(ttl) => Some(now + ttl),
            Expiry::Never => None,
            Expiry::Keep => live(&mut slots, key, now).and_then(|slot| slot.expires_at),
        };
        slots.insert(
            key.to_owned(),
            Slot {
                data: Data::Value(value),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        let mut slots = self.slots.lock().await;
        let existed = live(&mut slots, key, Instant::now()).is_some();
        slots.remove(key);
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        let mut slots = self.slots.lock().await;
        Ok(live(&mut slots, key, Instant::now()).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.check()?;
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        Ok(match live(&mut slots, key, now) {
            Some(slot) => {
                slot.expires_at = Some(now + ttl);
                true
            }
            None => false,
        })
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.check()?;
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        Ok(live(&mut slots, key, now)
            .and_then(|slot| slot.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now)))
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        self.check()?;
        let mut slots = self.slots.lock().await;
        let now = Instant::now();
        if live(&mut slots, key, now).is_none() {
            slots.insert(
                key.to_owned(),
                Slot {
                    data: Data::Set(BTreeSet::new()),
                    expires_at: None,
                },
            );
        }
        match slots.get_mut(key).map(|slot| &mut slot.data) {
            Some(Data::Set(members)) => {
                members.insert(member.to_owned());
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        self.check()?;
        let mut slots = self.slots.lock().await;
        let emptied = match live(&mut slots, key, Instant::now()).map(|slot| &mut slot.data) {
            None => return Ok(()),
            Some(Data::Set(members)) => {
                members.remove(member);
                members.is_empty()
            }
            Some(Data::Value(_)) => return Err(wrong_type(key)),
        };
        if emptied {
            slots.remove(key);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check()?;
        let mut slots = self.slots.lock().await;
        match live(&mut slots, key, Instant::now()).map(|slot| &slot.data) {
            None => Ok(Vec::new()),
            Some(Data::Set(members)) => Ok(members.iter().cloned().collect()),
            Some(Data::Value(_)) => Err(wrong_type(key)),
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check()?;
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        slots.retain(|_, slot| slot.is_live(now));
        let mut keys: Vec<String> = slots
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn used_memory(&self) -> StoreResult<Option<u64>> {
        self.check()?;
        let slots = self.slots.lock().await;
        let bytes: usize = slots.iter().map(|(key, slot)| key.len() + slot.size()).sum();
        Ok(Some(u64::try_from(bytes).unwrap_or(u64::MAX)))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.slots.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn values_expire_on_the_tokio_clock() {
        let conn = LocalCacheConnection::new();
        conn.set("k", Bytes::from_static(b"v"), Expiry::After(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(conn.ttl("k").await.unwrap(), Some(Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(conn.get("k").await.unwrap(), None);
        assert!(!conn.exists("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn keep_preserves_previous_expiry() {
        let conn = LocalCacheConnection::new();
        conn.set("k", Bytes::from_static(b"1"), Expiry::After(Duration::from_secs(10)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        conn.set("k", Bytes::from_static(b"2"), Expiry::Keep).await.unwrap();
        assert_eq!(conn.ttl("k").await.unwrap(), Some(Duration::from_secs(6)));

        conn.set("n", Bytes::from_static(b"3"), Expiry::Keep).await.unwrap();
        assert_eq!(conn.ttl("n").await.unwrap(), None);
        assert!(conn.exists("n").await.unwrap());
    }

    #[tokio::test]
    async fn sets_union_and_drop_when_empty() {
        let conn = LocalCacheConnection::new();
        conn.set_add("a", "1").await.unwrap();
        conn.set_add("a", "2").await.unwrap();
        conn.set_add("b", "2").await.unwrap();
        conn.set_add("b", "3").await.unwrap();

        let union = conn.set_union(&["a".into(), "b".into()]).await.unwrap();
        assert_eq!(union, ["1", "2", "3"]);

        conn.set_remove("b", "2").await.unwrap();
        conn.set_remove("b", "3").await.unwrap();
        assert!(!conn.exists("b").await.unwrap());
        assert!(conn.set_members("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn kinds_do_not_mix() {
        let conn = LocalCacheConnection::new();
        conn.set("v", Bytes::from_static(b"x"), Expiry::Never).await.unwrap();
        assert!(conn.set_add("v", "m").await.is_err());
        conn.set_add("s", "m").await.unwrap();
        assert!(conn.get("s").await.is_err());
    }

    #[tokio::test]
    async fn outage_fails_every_command() {
        let conn = LocalCacheConnection::new();
        conn.simulate_outage(true);
        assert!(conn.ping().await.is_err());
        assert!(conn.get("k").await.is_err());
        conn.simulate_outage(false);
        assert!(conn.ping().await.is_ok());

        conn.close().await;
        assert!(matches!(conn.ping().await, Err(MemoryError::Closed)));
    }
}
