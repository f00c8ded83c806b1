// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! One mempool partition.
//!
//! A shard is a priority-ordered map (fee DESC, txId ASC) behind an
//! rw-lock, plus atomic byte/count counters so admission can pre-check
//! budgets without taking the lock. The optimistic-read /
//! pessimistic-write discipline: snapshots and scans under the read
//! lock, structural changes under the write lock.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::tx::{Transaction, TxKey};

/// One of the mempool's partitions.
#[derive(Default)]
pub struct Shard {
    entries: RwLock<BTreeMap<TxKey, Arc<Transaction>>>,
    bytes: AtomicUsize,
    count: AtomicUsize,
}

impl Shard {
    /// Empty shard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shard transaction count (atomic, lock-free).
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Shard byte total (atomic, lock-free).
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    /// Reserve one slot. Returns the post-reservation count.
    pub(super) fn reserve_count(&self) -> usize {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Roll back a slot reservation.
    pub(super) fn release_count(&self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Reserve bytes. Returns the post-reservation total.
    pub(super) fn reserve_bytes(&self, n: usize) -> usize {
        self.bytes.fetch_add(n, Ordering::AcqRel) + n
    }

    /// Roll back a byte reservation.
    pub(super) fn release_bytes(&self, n: usize) {
        self.bytes.fetch_sub(n, Ordering::AcqRel);
    }

    /// Insert under the write lock. Returns false (leaving the set
    /// untouched) when an equal (fee, txId) entry already exists.
    pub(super) fn insert(&self, tx: Arc<Transaction>) -> bool {
        let key = tx.key();
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, tx);
        true
    }

    /// Snapshot up to `n` keys from the head of the priority order.
    #[must_use]
    pub fn snapshot_top(&self, n: usize) -> Vec<TxKey> {
        self.entries.read().keys().take(n).cloned().collect()
    }

    /// Remove one entry by key under the write lock.
    ///
    /// Counter deduction is the caller's job (it also owns the global
    /// counters). Returns None when the entry vanished since snapshot.
    pub(super) fn remove_key(&self, key: &TxKey) -> Option<Arc<Transaction>> {
        self.entries.write().remove(key)
    }

    /// Linear scan for a transaction id under the read lock.
    #[must_use]
    pub fn find_by_id(&self, tx_id: &str) -> Option<Arc<Transaction>> {
        self.entries
            .read()
            .iter()
            .find(|(key, _)| key.tx_id() == tx_id)
            .map(|(_, tx)| Arc::clone(tx))
    }

    /// Find the priority key for a transaction id.
    pub(super) fn key_for_id(&self, tx_id: &str) -> Option<TxKey> {
        self.entries
            .read()
            .keys()
            .find(|key| key.tx_id() == tx_id)
            .cloned()
    }

    /// Collect keys of entries expired as of `now_ms` (read lock only).
    pub(super) fn collect_expired(&self, now_ms: u64) -> Vec<TxKey> {
        self.entries
            .read()
            .iter()
            .filter(|(_, tx)| tx.is_expired(now_ms))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Iteration order sanity: snapshot every key.
    #[cfg(test)]
    pub(super) fn all_keys(&self) -> Vec<TxKey> {
        self.entries.read().keys().cloned().collect()
    }
}
