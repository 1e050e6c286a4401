//! Process-wide counters for cache behaviour, degraded queries and batch jobs.
//! Read by the `status` command and by tests; no exposition endpoint yet.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

static DEGRADED_QUERIES: AtomicU64 = AtomicU64::new(0);
static STALE_FALLBACKS: AtomicU64 = AtomicU64::new(0);
static MALFORMED_DOCUMENTS: AtomicU64 = AtomicU64::new(0);
static BATCHES_COMMITTED: AtomicU64 = AtomicU64::new(0);
static BATCHES_FAILED: AtomicU64 = AtomicU64::new(0);
static TRANSACTIONS_ABORTED: AtomicU64 = AtomicU64::new(0);
static SWEEPS_RUN: AtomicU64 = AtomicU64::new(0);

static CACHE_COUNTERS: OnceLock<Mutex<HashMap<String, CacheCounter>>> = OnceLock::new();

pub fn inc_degraded_queries() {
    DEGRADED_QUERIES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_stale_fallbacks() {
    STALE_FALLBACKS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_malformed_documents() {
    MALFORMED_DOCUMENTS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_batches_committed() {
    BATCHES_COMMITTED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_batches_failed() {
    BATCHES_FAILED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_transactions_aborted() {
    TRANSACTIONS_ABORTED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_sweeps_run() {
    SWEEPS_RUN.fetch_add(1, Ordering::Relaxed);
}

/// Per cache-family lookup outcomes. The family is the key prefix before the
/// first `_` (`leaderboard`, `shop`, `department`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheCounter {
    pub hits: u64,
    pub misses: u64,
    /// Entries that existed but were older than the requested max age.
    pub stale: u64,
}

#[derive(Debug, Clone, Copy)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Stale,
}

fn cache_counter_lock() -> MutexGuard<'static, HashMap<String, CacheCounter>> {
    CACHE_COUNTERS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn cache_family(key: &str) -> &str {
    key.split('_').next().unwrap_or(key)
}

pub fn record_cache_lookup(key: &str, outcome: CacheOutcome) -> CacheCounter {
    let mut guard = cache_counter_lock();
    let counter = guard.entry(cache_family(key).to_string()).or_default();
    match outcome {
        CacheOutcome::Hit => counter.hits = counter.hits.saturating_add(1),
        CacheOutcome::Miss => counter.misses = counter.misses.saturating_add(1),
        CacheOutcome::Stale => {
            counter.misses = counter.misses.saturating_add(1);
            counter.stale = counter.stale.saturating_add(1);
        }
    }
    *counter
}

pub fn cache_counters_snapshot() -> HashMap<String, CacheCounter> {
    cache_counter_lock().clone()
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub degraded_queries: u64,
    pub stale_fallbacks: u64,
    pub malformed_documents: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub transactions_aborted: u64,
    pub sweeps_run: u64,
    pub cache: HashMap<String, CacheCounter>,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        degraded_queries: DEGRADED_QUERIES.load(Ordering::Relaxed),
        stale_fallbacks: STALE_FALLBACKS.load(Ordering::Relaxed),
        malformed_documents: MALFORMED_DOCUMENTS.load(Ordering::Relaxed),
        batches_committed: BATCHES_COMMITTED.load(Ordering::Relaxed),
        batches_failed: BATCHES_FAILED.load(Ordering::Relaxed),
        transactions_aborted: TRANSACTIONS_ABORTED.load(Ordering::Relaxed),
        sweeps_run: SWEEPS_RUN.load(Ordering::Relaxed),
        cache: cache_counters_snapshot(),
    }
}
