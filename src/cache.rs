//! Process-local timed cache shared by the aggregation, casino and shop services.
//!
//! Entries are type-erased values stamped with the time they were stored.
//! Freshness is decided by the reader: the same entry can be fresh for a
//! caller asking for "two minutes" and stale for one asking for "thirty
//! seconds". Reading with the wrong type is treated as a miss.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use log::trace;

use crate::metrics::{self, CacheOutcome};

/// How old a cached value may be and still count as fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAge {
    /// Fresh while `now - stored_at` is strictly less than the duration.
    Within(Duration),
    /// Fresh regardless of age. Used for stale-on-error fallbacks.
    Unbounded,
}

impl MaxAge {
    pub fn seconds(secs: i64) -> Self {
        MaxAge::Within(Duration::seconds(secs))
    }

    pub fn minutes(mins: i64) -> Self {
        MaxAge::Within(Duration::minutes(mins))
    }

    fn admits(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            MaxAge::Unbounded => true,
            MaxAge::Within(limit) => now.signed_duration_since(stored_at) < *limit,
        }
    }
}

#[derive(Clone)]
struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    stored_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct TimedCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl TimedCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.set_at(key, value, Utc::now());
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set_at<T: Any + Send + Sync>(&self, key: &str, value: T, now: DateTime<Utc>) {
        self.write().insert(
            key.to_string(),
            CacheEntry {
                value: Arc::new(value),
                stored_at: now,
            },
        );
    }

    pub fn get<T: Any + Send + Sync + Clone>(&self, key: &str, max_age: MaxAge) -> Option<T> {
        self.get_at(key, max_age, Utc::now())
    }

    pub fn get_at<T: Any + Send + Sync + Clone>(
        &self,
        key: &str,
        max_age: MaxAge,
        now: DateTime<Utc>,
    ) -> Option<T> {
        let entry = self.read().get(key).cloned();
        let Some(entry) = entry else {
            metrics::record_cache_lookup(key, CacheOutcome::Miss);
            return None;
        };
        if !max_age.admits(entry.stored_at, now) {
            trace!("cache entry {} is stale", key);
            metrics::record_cache_lookup(key, CacheOutcome::Stale);
            return None;
        }
        match entry.value.downcast_ref::<T>() {
            Some(value) => {
                metrics::record_cache_lookup(key, CacheOutcome::Hit);
                Some(value.clone())
            }
            None => {
                metrics::record_cache_lookup(key, CacheOutcome::Miss);
                None
            }
        }
    }

    /// When the entry under `key` was stored, if any.
    pub fn stored_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.read().get(key).map(|entry| entry.stored_at)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    /// Drop every entry whose key starts with `prefix`; returns how many went.
    pub fn clear_by_prefix(&self, prefix: &str) -> usize {
        let mut guard = self.write();
        let before = guard.len();
        guard.retain(|key, _| !key.starts_with(prefix));
        before - guard.len()
    }

    pub fn clear_all(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
