// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Capacity- and TTL-bounded concurrent map with an eviction hook.
//!
//! Backs the connection registry (10k entries, 60 s idle TTL, close hook)
//! and the delivered-payload dedup cache. Reads touch the entry's
//! last-access stamp; a periodic [`TtlMap::prune`] drops idle entries and
//! runs the hook on each.
//!
//! Capacity overflow evicts the least-recently-accessed entry found in a
//! bounded scan rather than a strict LRU - cheap, and good enough for a
//! map whose TTL does the real bounding.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Entries sampled when the map is full and must evict.
const EVICT_SCAN_LIMIT: usize = 64;

struct TtlEntry<V> {
    value: V,
    /// Milliseconds since the map's epoch at last access.
    last_access_ms: AtomicU64,
}

/// Hook invoked with each evicted key/value.
pub type EvictHook<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

/// Concurrent map bounded by entry count and idle TTL.
pub struct TtlMap<K, V> {
    inner: DashMap<K, TtlEntry<V>>,
    epoch: Instant,
    capacity: usize,
    ttl: Duration,
    on_evict: Option<EvictHook<K, V>>,
}

impl<K, V> TtlMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a map with the given bounds and no eviction hook.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_hook(capacity, ttl, None)
    }

    /// Create a map with the given bounds and eviction hook.
    ///
    /// The hook runs for TTL expiry and capacity eviction, not for
    /// explicit [`TtlMap::remove`].
    #[must_use]
    pub fn with_hook(capacity: usize, ttl: Duration, on_evict: Option<EvictHook<K, V>>) -> Self {
        Self {
            inner: DashMap::new(),
            epoch: Instant::now(),
            capacity,
            ttl,
            on_evict,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Look up a key, refreshing its idle timer on hit.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.inner.get(key)?;
        entry.last_access_ms.store(self.now_ms(), Ordering::Release);
        Some(entry.value.clone())
    }

    /// Look up without refreshing the idle timer.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<V> {
        self.inner.get(key).map(|e| e.value.clone())
    }

    /// Insert a value, evicting the most idle sampled entry if full.
    /// Returns the previous value for the key, if any.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        if self.inner.len() >= self.capacity && !self.inner.contains_key(&key) {
            self.evict_one();
        }
        self.inner
            .insert(
                key,
                TtlEntry {
                    value,
                    last_access_ms: AtomicU64::new(self.now_ms()),
                },
            )
            .map(|e| e.value)
    }

    /// Fetch the value for `key`, inserting the result of `make` if
    /// absent. The idle timer refreshes either way.
    pub fn get_or_insert_with<F: FnOnce() -> V>(&self, key: K, make: F) -> V {
        if let Some(v) = self.get(&key) {
            return v;
        }
        if self.inner.len() >= self.capacity && !self.inner.contains_key(&key) {
            self.evict_one();
        }
        let entry = self.inner.entry(key).or_insert_with(|| TtlEntry {
            value: make(),
            last_access_ms: AtomicU64::new(self.now_ms()),
        });
        entry.last_access_ms.store(self.now_ms(), Ordering::Release);
        entry.value.clone()
    }

    /// Remove a key. The eviction hook does NOT run.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.remove(key).map(|(_, e)| e.value)
    }

    /// Whether the key is present (no timer refresh).
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Current entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Snapshot of current values (no timer refresh).
    #[must_use]
    pub fn values(&self) -> Vec<V> {
        self.inner.iter().map(|e| e.value.clone()).collect()
    }

    /// Drop every entry idle longer than the TTL, running the hook on
    /// each. Returns the number of entries evicted.
    pub fn prune(&self) -> usize {
        let now = self.now_ms();
        let ttl_ms = self.ttl.as_millis() as u64;

        let expired: Vec<K> = self
            .inner
            .iter()
            .filter(|e| now.saturating_sub(e.last_access_ms.load(Ordering::Acquire)) >= ttl_ms)
            .map(|e| e.key().clone())
            .collect();

        let mut evicted = 0;
        for key in expired {
            // Re-check under the removal so a concurrent touch wins.
            if let Some((k, e)) = self.inner.remove_if(&key, |_, e| {
                now.saturating_sub(e.last_access_ms.load(Ordering::Acquire)) >= ttl_ms
            }) {
                if let Some(hook) = &self.on_evict {
                    hook(&k, &e.value);
                }
                evicted += 1;
            }
        }
        evicted
    }

    /// Evict the most idle entry among a bounded sample.
    fn evict_one(&self) {
        let victim = self
            .inner
            .iter()
            .take(EVICT_SCAN_LIMIT)
            .min_by_key(|e| e.last_access_ms.load(Ordering::Acquire))
            .map(|e| e.key().clone());

        if let Some(key) = victim {
            if let Some((k, e)) = self.inner.remove(&key) {
                if let Some(hook) = &self.on_evict {
                    hook(&k, &e.value);
                }
            }
        }
    }
}
