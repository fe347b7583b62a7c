//! Bounded in-process store organised into LRU context windows.
//!
//! Two independent bounds apply:
//!
//! * every entry joins the context window named by its `context_window`
//!   metadata (default `"default"`); a window is an LRU set capped at its
//!   size, touched by both writes and reads;
//! * the store as a whole holds at most `max_total_entries` entries and
//!   evicts the oldest insertion first, whatever window it belongs to.
//!
//! A background sweep removes entries whose TTL elapsed and windows that
//! have been idle for longer than `window_ttl`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use lru::LruCache;
use memory_config::{ConfigMap, ConfigResult, ShortTermConfig};
use memory_primitives::{
    rank_entries, EntryPatch, MemoryEntry, MemoryQuery, MemoryResult, MemoryStats, MemoryStore,
    MemoryType, StoreResult, CONTEXT_WINDOW_KEY,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::stats::StoreCounters;
use crate::window::ContextWindow;

/// Window joined by entries without `context_window` metadata.
pub const DEFAULT_WINDOW: &str = "default";

/// Metadata key overriding the size of a window when the entry creates it.
pub const WINDOW_SIZE_KEY: &str = "window_size";

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries dropped because their lifetime elapsed.
    pub expired_entries: usize,
    /// Windows dropped because they sat idle.
    pub stale_windows: usize,
}

impl SweepReport {
    /// Returns `true` when nothing was removed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.expired_entries == 0 && self.stale_windows == 0
    }
}

#[derive(Debug)]
struct State {
    // Used in insertion order only: reads go through `peek`, so the least
    // recently used slot is always the oldest insertion.
    entries: LruCache<String, MemoryEntry>,
    windows: HashMap<String, ContextWindow>,
}

impl State {
    fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            windows: HashMap::new(),
        }
    }

    fn scrub(&mut self, id: &str) {
        for window in self.windows.values_mut() {
            window.remove(id);
        }
    }

    fn remove_entry(&mut self, id: &str) -> Option<MemoryEntry> {
        let removed = self.entries.pop(id);
        if removed.is_some() {
            self.scrub(id);
        }
        removed
    }

    fn join_window(&mut self, entry: &MemoryEntry, default_size: usize, now: DateTime<Utc>) {
        let name = window_of(entry).to_owned();
        let window = self
            .windows
            .entry(name)
            .or_insert_with(|| ContextWindow::new(requested_window_size(entry).unwrap_or(default_size), now));
        let evicted = window.add_entry(entry.id(), now);
        if !evicted.is_empty() {
            debug!(window = %window_of(entry), evicted = evicted.len(), "context window evicted entries");
        }
    }

    fn leave_window(&mut self, id: &str, window: &str) {
        if let Some(window) = self.windows.get_mut(window) {
            window.remove(id);
        }
    }
}

fn window_of(entry: &MemoryEntry) -> &str {
    entry.metadata_str(CONTEXT_WINDOW_KEY).unwrap_or(DEFAULT_WINDOW)
}

fn requested_window_size(entry: &MemoryEntry) -> Option<usize> {
    entry
        .metadata()
        .get(WINDOW_SIZE_KEY)
        .and_then(Value::as_u64)
        .and_then(|size| usize::try_from(size).ok())
        .filter(|size| *size > 0)
}

#[derive(Debug)]
struct Shared {
    config: ShortTermConfig,
    state: tokio::sync::Mutex<State>,
    counters: StoreCounters,
    closed: AtomicBool,
}

impl Shared {
    fn entry_ttl(&self) -> TimeDelta {
        TimeDelta::from_std(self.config.entry_ttl()).unwrap_or(TimeDelta::MAX)
    }

    fn window_ttl(&self) -> TimeDelta {
        TimeDelta::from_std(self.config.window_ttl()).unwrap_or(TimeDelta::MAX)
    }

    /// Entries with their own TTL expire on it; others after `entry_ttl`.
    fn is_stale(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> bool {
        if entry.ttl_secs().is_some() {
            entry.is_expired_at(now)
        } else {
            now - entry.timestamp() > self.entry_ttl()
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> SweepReport {
        let mut state = self.state.lock().await;

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| self.is_stale(entry, now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            state.remove_entry(id);
        }

        let window_ttl = self.window_ttl();
        let before = state.windows.len();
        state.windows.retain(|_, window| !window.is_idle(now, window_ttl));

        SweepReport {
            expired_entries: expired.len(),
            stale_windows: before - state.windows.len(),
        }
    }
}

struct Sweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// In-process store with LRU context windows and a global FIFO cap.
pub struct ShortTermStore {
    shared: Arc<Shared>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl std::fmt::Debug for ShortTermStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShortTermStore")
            .field("config", &self.shared.config)
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ShortTermStore {
    /// Creates an empty store. The sweep starts on [`initialize`](MemoryStore::initialize)
    /// or the first write, whichever comes first.
    #[must_use]
    pub fn new(config: ShortTermConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: tokio::sync::Mutex::new(State::new()),
                counters: StoreCounters::default(),
                closed: AtomicBool::new(false),
            }),
            sweeper: Mutex::new(None),
        }
    }

    /// Builds a store from a configuration map.
    ///
    /// # Errors
    ///
    /// Returns [`memory_config::ConfigError`] when the map is malformed or invalid.
    pub fn from_map(map: &ConfigMap) -> ConfigResult<Self> {
        ShortTermConfig::from_map(map).map(Self::new)
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &ShortTermConfig {
        &self.shared.config
    }

    /// Number of entries currently held.
    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.entries.len()
    }

    /// Returns `true` when the store holds nothing.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Names of the live context windows, sorted.
    pub async fn window_names(&self) -> Vec<String> {
        let state = self.shared.state.lock().await;
        let mut names: Vec<String> = state.windows.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of ids held by `window`.
    pub async fn window_len(&self, window: &str) -> Option<usize> {
        self.shared
            .state
            .lock()
            .await
            .windows
            .get(window)
            .map(ContextWindow::len)
    }

    /// Ids held by `window`, least recently used first.
    pub async fn window_ids(&self, window: &str) -> Option<Vec<String>> {
        self.shared
            .state
            .lock()
            .await
            .windows
            .get(window)
            .map(ContextWindow::ids_oldest_first)
    }

    /// Drops `window` and every entry it holds; returns the number of entries removed.
    pub async fn clear_window(&self, window: &str) -> usize {
        let mut state = self.shared.state.lock().await;
        let Some(removed) = state.windows.remove(window) else {
            return 0;
        };
        let ids = removed.ids_oldest_first();
        let count = ids
            .iter()
            .filter(|id| state.remove_entry(id).is_some())
            .count();
        debug!(window, entries = count, "context window cleared");
        count
    }

    /// Runs one sweep at `now`. The background task calls this on every tick.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> SweepReport {
        self.shared.purge_expired(now).await
    }

    fn start_sweeper(&self) -> bool {
        let mut slot = self.sweeper.lock().expect("sweeper slot poisoned");
        if slot.is_some() {
            return true;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime available; short-term sweep not started");
            return false;
        };

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(run_sweep_loop(
            Arc::downgrade(&self.shared),
            self.shared.config.cleanup_interval(),
            cancel.clone(),
        ));
        *slot = Some(Sweeper { cancel, handle });
        debug!(
            interval_secs = self.shared.config.cleanup_interval_secs,
            "short-term sweep started"
        );
        true
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

async fn run_sweep_loop(shared: Weak<Shared>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let report = shared.purge_expired(Utc::now()).await;
        if !report.is_empty() {
            info!(
                expired_entries = report.expired_entries,
                stale_windows = report.stale_windows,
                "short-term sweep removed data"
            );
        }
    }
    debug!("short-term sweep stopped");
}

impl Drop for ShortTermStore {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some(sweeper) = slot.take() {
                sweeper.cancel.cancel();
            }
        }
    }
}

#[async_trait]
impl MemoryStore for ShortTermStore {
    fn kind(&self) -> &'static str {
        "short_term"
    }

    async fn initialize(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        let started = self.start_sweeper();
        info!(
            max_total_entries = self.shared.config.max_total_entries,
            sweep = started,
            "short-term store initialized"
        );
        started
    }

    async fn store(&self, entry: MemoryEntry) -> bool {
        if self.is_closed() {
            warn!(id = %entry.id(), "store on closed short-term store");
            return false;
        }
        self.start_sweeper();

        let now = Utc::now();
        let default_size = self.shared.config.default_window_size;
        let mut state = self.shared.state.lock().await;

        let id = entry.id().to_owned();
        if let Some(existing) = state.entries.peek_mut(&id) {
            let previous_window = window_of(existing).to_owned();
            *existing = entry.clone();
            if previous_window != window_of(&entry) {
                state.leave_window(&id, &previous_window);
            }
        } else {
            while state.entries.len() >= self.shared.config.max_total_entries {
                let Some((oldest, _)) = state.entries.pop_lru() else {
                    break;
                };
                state.scrub(&oldest);
                debug!(id = %oldest, "evicted oldest entry at capacity");
            }
            state.entries.push(id.clone(), entry.clone());
        }
        state.join_window(&entry, default_size, now);
        drop(state);

        self.shared.counters.record_store();
        debug!(id = %id, window = %window_of(&entry), "short-term entry stored");
        true
    }

    async fn retrieve(&self, query: &MemoryQuery) -> MemoryResult {
        let started = Instant::now();
        if self.is_closed() {
            return MemoryResult::failed(started.elapsed());
        }

        let now = Utc::now();
        let mut state = self.shared.state.lock().await;
        let scoped = query.context_window();

        let candidates: Vec<&MemoryEntry> = match scoped {
            Some(name) => state.windows.get(name).map_or_else(Vec::new, |window| {
                window
                    .ids_oldest_first()
                    .iter()
                    .filter_map(|id| state.entries.peek(id))
                    .collect()
            }),
            None => state.entries.iter().map(|(_, entry)| entry).collect(),
        };
        let ignored: &[&str] = if scoped.is_some() {
            &[CONTEXT_WINDOW_KEY]
        } else {
            &[]
        };

        let mut matches: Vec<MemoryEntry> = candidates
            .into_iter()
            .filter(|entry| !self.shared.is_stale(entry, now))
            .filter(|entry| query.matches_attributes(entry, ignored) && query.matches_content(entry))
            .cloned()
            .collect();
        rank_entries(&mut matches);
        let total = matches.len();
        matches.truncate(query.limit());

        for entry in &matches {
            if let Some(window) = state.windows.get_mut(window_of(entry)) {
                window.get_entry(entry.id(), now);
            }
        }
        drop(state);

        let elapsed = started.elapsed();
        self.shared.counters.record_retrieval(elapsed, !matches.is_empty());
        MemoryResult::found(matches, total, elapsed)
    }

    async fn update(&self, id: &str, patch: EntryPatch) -> bool {
        if self.is_closed() {
            return false;
        }
        let now = Utc::now();
        let default_size = self.shared.config.default_window_size;
        let mut state = self.shared.state.lock().await;

        let Some(entry) = state.entries.peek_mut(id) else {
            return false;
        };
        let previous_window = window_of(entry).to_owned();
        entry.apply_patch(patch);
        let updated = entry.clone();

        if previous_window != window_of(&updated) {
            state.leave_window(id, &previous_window);
            state.join_window(&updated, default_size, now);
        }
        debug!(id, "short-term entry updated");
        true
    }

    async fn delete(&self, id: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        self.shared.state.lock().await.remove_entry(id).is_some()
    }

    async fn clear(&self, memory_type: Option<MemoryType>) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut state = self.shared.state.lock().await;
        match memory_type {
            None => {
                state.entries.clear();
                state.windows.clear();
            }
            Some(kind) => {
                let ids: Vec<String> = state
                    .entries
                    .iter()
                    .filter(|(_, entry)| entry.memory_type() == kind)
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in &ids {
                    state.remove_entry(id);
                }
            }
        }
        info!(memory_type = ?memory_type, "short-term store cleared");
        true
    }

    async fn get_stats(&self) -> StoreResult<MemoryStats> {
        let state = self.shared.state.lock().await;
        let mut entries_by_type = BTreeMap::new();
        let mut usage = 0_usize;
        for (_, entry) in &state.entries {
            *entries_by_type.entry(entry.memory_type()).or_insert(0) += 1;
            usage += entry.approximate_size();
        }

        let mut stats = MemoryStats {
            total_entries: state.entries.len(),
            memory_usage: u64::try_from(usage).unwrap_or(u64::MAX),
            entries_by_type,
            ..MemoryStats::default()
        };
        drop(state);
        self.shared.counters.fill(&mut stats);
        Ok(stats)
    }

    async fn health_check(&self) -> bool {
        !self.is_closed()
    }

    async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let sweeper = self.sweeper.lock().expect("sweeper slot poisoned").take();
        if let Some(Sweeper { cancel, handle }) = sweeper {
            cancel.cancel();
            if let Err(err) = handle.await {
                warn!(?err, "short-term sweep task ended abnormally");
            }
        }
        let mut state = self.shared.state.lock().await;
        state.entries.clear();
        state.windows.clear();
        info!("short-term store closed");
    }
}
