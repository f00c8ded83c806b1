// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Request-id to completion-handle correlation.
//!
//! Callers register a 16-byte request id and hold the returned
//! completion; whoever sees the matching response completes it. Values
//! are held weakly - if the caller dropped the handle, completion is a
//! silent no-op - and every entry carries a TTL so abandoned ids cannot
//! accumulate. `complete` for an unknown id is a no-op.

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::config::{CORRELATOR_CAPACITY, CORRELATOR_TTL_MS};
use crate::core::{Completion, RequestId};

struct CorrEntry {
    handle: Weak<Completion<Vec<u8>>>,
    deadline: Instant,
}

/// TTL-bounded map of in-flight request correlations.
pub struct ResponseCorrelator {
    entries: DashMap<RequestId, CorrEntry>,
    capacity: usize,
    default_ttl: Duration,
}

impl ResponseCorrelator {
    /// Correlator with the default TTL and capacity.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_params(CORRELATOR_CAPACITY, Duration::from_millis(CORRELATOR_TTL_MS))
    }

    /// Correlator with explicit bounds.
    #[must_use]
    pub fn with_params(capacity: usize, default_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            capacity,
            default_ttl,
        })
    }

    /// Register a request id with the default TTL.
    pub fn register(&self, id: RequestId) -> Arc<Completion<Vec<u8>>> {
        self.register_with_ttl(id, self.default_ttl)
    }

    /// Register a request id; the entry is reclaimable after `ttl`.
    ///
    /// Re-registering an id replaces the previous entry (the old
    /// caller's future then times out on its own).
    pub fn register_with_ttl(&self, id: RequestId, ttl: Duration) -> Arc<Completion<Vec<u8>>> {
        if self.entries.len() >= self.capacity {
            // Opportunistic reclaim before refusing growth; eviction is
            // silent per contract.
            self.prune();
        }

        let handle = Completion::new();
        self.entries.insert(
            id,
            CorrEntry {
                handle: Arc::downgrade(&handle),
                deadline: Instant::now() + ttl,
            },
        );
        handle
    }

    /// Fulfill the completion registered under `id`.
    ///
    /// Returns true when a live waiter was completed. Unknown ids and
    /// dropped handles return false.
    pub fn complete(&self, id: &RequestId, bytes: Vec<u8>) -> bool {
        let Some((_, entry)) = self.entries.remove(id) else {
            return false;
        };
        match entry.handle.upgrade() {
            Some(handle) => handle.complete(bytes),
            None => false,
        }
    }

    /// Drop expired and dead-weak entries. Returns the count removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let stale: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|e| e.deadline <= now || e.handle.strong_count() == 0)
            .map(|e| *e.key())
            .collect();

        let mut removed = 0;
        for id in stale {
            if self
                .entries
                .remove_if(&id, |_, e| e.deadline <= now || e.handle.strong_count() == 0)
                .is_some()
            {
                removed += 1;
            }
        }
        removed
    }

    /// In-flight entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(n: u64) -> RequestId {
        RequestId::from_parts(n, n)
    }

    #[test]
    fn test_register_complete_roundtrip() {
        let corr = ResponseCorrelator::new();
        let handle = corr.register(rid(1));

        assert!(corr.complete(&rid(1), b"pong".to_vec()));
        assert_eq!(handle.try_get().as_deref(), Some(&b"pong"[..]));
        // The entry is consumed.
        assert!(!corr.complete(&rid(1), vec![]));
    }

    #[test]
    fn test_complete_unknown_id_is_noop() {
        let corr = ResponseCorrelator::new();
        assert!(!corr.complete(&rid(42), vec![]));
    }

    #[test]
    fn test_dropped_handle_completes_silently() {
        let corr = ResponseCorrelator::new();
        {
            let _handle = corr.register(rid(2));
        }
        assert!(!corr.complete(&rid(2), b"late".to_vec()));
    }

    #[test]
    fn test_prune_reclaims_expired_and_dead() {
        let corr = ResponseCorrelator::with_params(100, Duration::from_millis(20));
        let _live = corr.register_with_ttl(rid(1), Duration::from_secs(60));
        let _expiring = corr.register(rid(2));
        {
            let _dropped = corr.register_with_ttl(rid(3), Duration::from_secs(60));
        }

        std::thread::sleep(Duration::from_millis(40));
        let removed = corr.prune();
        assert_eq!(removed, 2);
        assert_eq!(corr.len(), 1);
    }

    #[test]
    fn test_capacity_pressure_triggers_reclaim() {
        let corr = ResponseCorrelator::with_params(4, Duration::from_millis(1));
        for i in 0..4 {
            let _ = corr.register(rid(i));
        }
        std::thread::sleep(Duration::from_millis(10));
        // All four are dead and expired; the fifth registration reclaims.
        let handle = corr.register(rid(99));
        assert!(corr.len() <= 4);
        assert!(corr.complete(&rid(99), vec![1]));
        assert_eq!(handle.try_get(), Some(vec![1]));
    }
}
