//! Named LRU context windows used by the short-term store.

use chrono::{DateTime, TimeDelta, Utc};
use lru::LruCache;

/// Capacity-bounded LRU set of entry ids.
///
/// Both writes ([`add_entry`](Self::add_entry)) and reads
/// ([`get_entry`](Self::get_entry)) move an id to the most-recent end.
#[derive(Debug)]
pub(crate) struct ContextWindow {
    max_size: usize,
    ids: LruCache<String, ()>,
    last_accessed: DateTime<Utc>,
}

impl ContextWindow {
    pub(crate) fn new(max_size: usize, now: DateTime<Utc>) -> Self {
        Self {
            max_size: max_size.max(1),
            ids: LruCache::unbounded(),
            last_accessed: now,
        }
    }

    /// Inserts `id` as most recent and returns the ids evicted to stay within capacity.
    pub(crate) fn add_entry(&mut self, id: &str, now: DateTime<Utc>) -> Vec<String> {
        self.ids.pop(id);
        self.ids.push(id.to_owned(), ());
        self.last_accessed = now;

        let mut evicted = Vec::new();
        while self.ids.len() > self.max_size {
            match self.ids.pop_lru() {
                Some((oldest, ())) => evicted.push(oldest),
                None => break,
            }
        }
        evicted
    }

    /// Marks `id` as most recently used; `false` when the window does not hold it.
    pub(crate) fn get_entry(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        self.last_accessed = now;
        self.ids.get(id).is_some()
    }

    pub(crate) fn remove(&mut self, id: &str) -> bool {
        self.ids.pop(id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    /// Ids from least to most recently used.
    pub(crate) fn ids_oldest_first(&self) -> Vec<String> {
        self.ids.iter().rev().map(|(id, ())| id.clone()).collect()
    }

    /// `true` when the window has not been touched for longer than `ttl`.
    pub(crate) fn is_idle(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now - self.last_accessed > ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_touched() {
        let now = Utc::now();
        let mut window = ContextWindow::new(2, now);
        assert!(window.add_entry("a", now).is_empty());
        assert!(window.add_entry("b", now).is_empty());
        assert_eq!(window.add_entry("c", now), ["a"]);

        assert!(window.get_entry("b", now));
        assert_eq!(window.add_entry("d", now), ["c"]);
        assert_eq!(window.ids_oldest_first(), ["b", "d"]);
    }

    #[test]
    fn rewriting_an_id_refreshes_it() {
        let now = Utc::now();
        let mut window = ContextWindow::new(2, now);
        window.add_entry("a", now);
        window.add_entry("b", now);
        window.add_entry("a", now);
        assert_eq!(window.add_entry("c", now), ["b"]);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn idle_detection_uses_last_touch() {
        let start = Utc::now();
        let mut window = ContextWindow::new(4, start);
        let ttl = TimeDelta::seconds(10);
        assert!(!window.is_idle(start + TimeDelta::seconds(5), ttl));
        window.get_entry("missing", start + TimeDelta::seconds(8));
        assert!(!window.is_idle(start + TimeDelta::seconds(15), ttl));
        assert!(window.is_idle(start + TimeDelta::seconds(19), ttl));
    }
}
