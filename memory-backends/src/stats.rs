//! Cumulative counters shared by the backends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use memory_primitives::MemoryStats;

#[derive(Debug, Default)]
pub(crate) struct StoreCounters {
    stores: AtomicU64,
    retrievals: AtomicU64,
    retrieval_nanos: AtomicU64,
    gets: AtomicU64,
    hits: AtomicU64,
}

impl StoreCounters {
    pub(crate) fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    /// A retrieval counts as one get; it hits when anything was returned.
    pub(crate) fn record_retrieval(&self, elapsed: Duration, hit: bool) {
        self.retrievals.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.retrieval_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.record_get(hit);
    }

    pub(crate) fn record_get(&self, hit: bool) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Fills the cumulative fields of `stats`.
    pub(crate) fn fill(&self, stats: &mut MemoryStats) {
        let retrievals = self.retrievals.load(Ordering::Relaxed);
        let total_time = Duration::from_nanos(self.retrieval_nanos.load(Ordering::Relaxed));
        stats.total_stores = self.stores.load(Ordering::Relaxed);
        stats.total_retrievals = retrievals;
        stats.average_retrieval_time = MemoryStats::mean(total_time, retrievals);
        stats.hit_rate = MemoryStats::ratio(
            self.hits.load(Ordering::Relaxed),
            self.gets.load(Ordering::Relaxed),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_counts_retrievals_and_gets() {
        let counters = StoreCounters::default();
        counters.record_store();
        counters.record_retrieval(Duration::from_millis(4), true);
        counters.record_retrieval(Duration::from_millis(2), false);
        counters.record_get(true);
        counters.record_get(false);

        let mut stats = MemoryStats::default();
        counters.fill(&mut stats);
        assert_eq!(stats.total_stores, 1);
        assert_eq!(stats.total_retrievals, 2);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.average_retrieval_time, Duration::from_millis(3));
    }
}
