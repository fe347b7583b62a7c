//! Aggregated statistics across backends.

use std::time::Duration;

use memory_primitives::MemoryStats;
use serde::Serialize;

/// Statistics of one backend, or the reason they are missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendStats {
    /// Registry name.
    pub name: String,
    /// Backend kind label.
    pub kind: String,
    /// Snapshot, when the backend produced one.
    pub stats: Option<MemoryStats>,
    /// Failure message, when it did not.
    pub error: Option<String>,
}

impl BackendStats {
    /// A backend that reported statistics.
    #[must_use]
    pub fn reported(name: impl Into<String>, kind: impl Into<String>, stats: MemoryStats) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            stats: Some(stats),
            error: None,
        }
    }

    /// A backend whose statistics call failed.
    #[must_use]
    pub fn failed(name: impl Into<String>, kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            stats: None,
            error: Some(error.into()),
        }
    }
}

/// Per-backend statistics in registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsReport {
    /// Per-backend entries.
    pub backends: Vec<BackendStats>,
}

impl StatsReport {
    /// Wraps per-backend entries.
    #[must_use]
    pub fn new(backends: Vec<BackendStats>) -> Self {
        Self { backends }
    }

    /// Looks up one backend by registry name.
    #[must_use]
    pub fn backend(&self, name: &str) -> Option<&BackendStats> {
        self.backends.iter().find(|backend| backend.name == name)
    }

    /// Number of backends whose statistics call failed.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.backends.iter().filter(|backend| backend.error.is_some()).count()
    }

    /// Sums the reporting backends into one snapshot.
    ///
    /// Hit rate and retrieval time are weighted by each backend's retrieval count.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn totals(&self) -> MemoryStats {
        let mut totals = MemoryStats::default();
        let mut weighted_hits = 0.0;
        let mut retrieval_time = Duration::ZERO;

        for stats in self.backends.iter().filter_map(|backend| backend.stats.as_ref()) {
            totals.total_entries += stats.total_entries;
            totals.memory_usage = totals.memory_usage.saturating_add(stats.memory_usage);
            totals.total_stores += stats.total_stores;
            totals.total_retrievals += stats.total_retrievals;
            for (kind, count) in &stats.entries_by_type {
                *totals.entries_by_type.entry(*kind).or_insert(0) += count;
            }
            weighted_hits += stats.hit_rate * stats.total_retrievals as f64;
            retrieval_time += stats
                .average_retrieval_time
                .saturating_mul(u32::try_from(stats.total_retrievals).unwrap_or(u32::MAX));
        }

        if totals.total_retrievals > 0 {
            totals.hit_rate = weighted_hits / totals.total_retrievals as f64;
            totals.average_retrieval_time = MemoryStats::mean(retrieval_time, totals.total_retrievals);
        }
        totals
    }
}
