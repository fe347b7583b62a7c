//! Retrieval results and statistics snapshots.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::entry::{MemoryEntry, MemoryType};

/// Outcome of a retrieval.
///
/// `success` is `false` only when the backend itself failed; an empty result
/// set is still a success.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryResult {
    /// Matching entries, most relevant first.
    pub entries: Vec<MemoryEntry>,
    /// Number of matches before `limit` truncation.
    pub total_count: usize,
    /// Wall-clock time spent answering the query.
    pub query_time: Duration,
    /// Relevance scores parallel to `entries`; empty for non-similarity queries.
    pub similarity_scores: Vec<f32>,
    /// `false` on backend-level failure.
    pub success: bool,
}

impl MemoryResult {
    /// Builds a successful result without scores.
    #[must_use]
    pub fn found(entries: Vec<MemoryEntry>, total_count: usize, query_time: Duration) -> Self {
        Self {
            entries,
            total_count,
            query_time,
            similarity_scores: Vec::new(),
            success: true,
        }
    }

    /// Builds a successful result with relevance scores.
    ///
    /// Scores are truncated or dropped so they stay parallel to `entries`.
    #[must_use]
    pub fn scored(
        entries: Vec<MemoryEntry>,
        mut scores: Vec<f32>,
        total_count: usize,
        query_time: Duration,
    ) -> Self {
        if scores.len() == entries.len() {
            scores.shrink_to_fit();
        } else {
            scores.clear();
        }
        Self {
            entries,
            total_count,
            query_time,
            similarity_scores: scores,
            success: true,
        }
    }

    /// Successful result with nothing in it.
    #[must_use]
    pub fn empty() -> Self {
        Self::found(Vec::new(), 0, Duration::ZERO)
    }

    /// Backend-level failure.
    #[must_use]
    pub fn failed(query_time: Duration) -> Self {
        Self {
            success: false,
            ..Self::found(Vec::new(), 0, query_time)
        }
    }

    /// Returns `true` when no entries were returned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sorts entries by `(priority desc, timestamp desc)`.
pub fn rank_entries(entries: &mut [MemoryEntry]) {
    entries.sort_by(compare_rank);
}

fn compare_rank(a: &MemoryEntry, b: &MemoryEntry) -> Ordering {
    b.priority()
        .cmp(&a.priority())
        .then_with(|| b.timestamp().cmp(&a.timestamp()))
}

/// Point-in-time statistics for one backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    /// Entries currently held.
    pub total_entries: usize,
    /// Approximate bytes used.
    pub memory_usage: u64,
    /// Cumulative hits divided by cumulative gets.
    pub hit_rate: f64,
    /// Mean wall-clock time per retrieval.
    pub average_retrieval_time: Duration,
    /// Entry counts per category.
    pub entries_by_type: BTreeMap<MemoryType, usize>,
    /// Cumulative successful writes.
    pub total_stores: u64,
    /// Cumulative retrievals.
    pub total_retrievals: u64,
}

impl MemoryStats {
    /// Computes `hits / gets`, or `0.0` before the first get.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(hits: u64, gets: u64) -> f64 {
        if gets == 0 {
            0.0
        } else {
            hits as f64 / gets as f64
        }
    }

    /// Computes the mean of `total` over `count` samples.
    #[must_use]
    pub fn mean(total: Duration, count: u64) -> Duration {
        match u32::try_from(count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => total / count,
            #[allow(clippy::cast_precision_loss)]
            Err(_) => Duration::from_secs_f64(total.as_secs_f64() / count as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};

    fn entry(id: &str, priority: i32, age_secs: i64) -> MemoryEntry {
        MemoryEntry::builder(id, MemoryType::ShortTerm)
            .id(id)
            .priority(priority)
            .timestamp(Utc::now() - TimeDelta::seconds(age_secs))
            .build()
            .unwrap()
    }

    #[test]
    fn ranking_prefers_priority_then_recency() {
        let mut entries = vec![entry("old-low", 0, 30), entry("new-low", 0, 1), entry("old-high", 5, 60)];
        rank_entries(&mut entries);
        let ids: Vec<_> = entries.iter().map(MemoryEntry::id).collect();
        assert_eq!(ids, ["old-high", "new-low", "old-low"]);
    }

    #[test]
    fn scores_must_stay_parallel() {
        let result = MemoryResult::scored(vec![entry("a", 0, 0)], vec![0.5, 0.4], 1, Duration::ZERO);
        assert!(result.similarity_scores.is_empty());
        assert!(result.success);
    }

    #[test]
    fn stats_helpers_handle_zero() {
        assert!(MemoryStats::ratio(0, 0).abs() < f64::EPSILON);
        assert!((MemoryStats::ratio(1, 4) - 0.25).abs() < f64::EPSILON);
        assert_eq!(MemoryStats::mean(Duration::from_secs(4), 0), Duration::ZERO);
        assert_eq!(MemoryStats::mean(Duration::from_secs(4), 2), Duration::from_secs(2));
    }
}
