// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! In-memory [`KvStore`] with per-table LRU read caches.
//!
//! Backs tests and the standalone node. Tables are ordered maps behind
//! rw-locks; reads go through an LRU sized by each table's cache
//! policy. Atomic batches take the write locks of every involved table
//! in [`Table::ALL`] order, so concurrent batches cannot deadlock.

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use super::{KvStore, StoreError, Table, WriteOp};

type TableMap = BTreeMap<Vec<u8>, Vec<u8>>;

struct Column {
    data: RwLock<TableMap>,
    cache: Mutex<LruCache<Vec<u8>, Vec<u8>>>,
}

impl Column {
    fn new(table: Table) -> Self {
        let capacity = NonZeroUsize::new(table.cache_policy().capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            data: RwLock::new(BTreeMap::new()),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }
}

/// Heap-backed store.
pub struct MemoryStore {
    columns: [Column; Table::ALL.len()],
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with caches sized from each table's policy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            columns: [
                Column::new(Table::Account),
                Column::new(Table::Chain),
                Column::new(Table::Block),
                Column::new(Table::Peer),
            ],
        }
    }

    fn column(&self, table: Table) -> &Column {
        // Index layout matches Table::ALL.
        match table {
            Table::Account => &self.columns[0],
            Table::Chain => &self.columns[1],
            Table::Block => &self.columns[2],
            Table::Peer => &self.columns[3],
        }
    }

    fn invalidate(&self, table: Table, key: &[u8]) {
        self.column(table).cache.lock().pop(key);
    }

    /// Number of live entries in `table` (test/diagnostic aid).
    #[must_use]
    pub fn len(&self, table: Table) -> usize {
        self.column(table).data.read().len()
    }

    /// True when `table` holds nothing.
    #[must_use]
    pub fn is_empty(&self, table: Table) -> bool {
        self.len(table) == 0
    }
}

impl KvStore for MemoryStore {
    fn exists(&self, table: Table, key: &[u8]) -> Result<bool, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey);
        }
        Ok(self.column(table).data.read().contains_key(key))
    }

    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey);
        }
        let column = self.column(table);

        if let Some(hit) = column.cache.lock().get(key) {
            return Ok(Some(hit.clone()));
        }

        let value = column.data.read().get(key).cloned();
        if let Some(ref v) = value {
            column.cache.lock().put(key.to_vec(), v.clone());
        }
        Ok(value)
    }

    fn put(&self, table: Table, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey);
        }
        let column = self.column(table);
        column.data.write().insert(key.to_vec(), value.to_vec());
        self.invalidate(table, key);
        Ok(())
    }

    fn delete(&self, table: Table, key: &[u8]) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey);
        }
        self.column(table).data.write().remove(key);
        self.invalidate(table, key);
        Ok(())
    }

    fn get_batch(
        &self,
        table: Table,
        keys: &[Vec<u8>],
    ) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        keys.iter().map(|key| self.get(table, key)).collect()
    }

    fn put_batch(&self, table: Table, pairs: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError> {
        if pairs.iter().any(|(key, _)| key.is_empty()) {
            return Err(StoreError::InvalidKey);
        }
        let column = self.column(table);
        let mut data = column.data.write();
        for (key, value) in pairs {
            data.insert(key.clone(), value.clone());
        }
        drop(data);
        for (key, _) in pairs {
            self.invalidate(table, key);
        }
        Ok(())
    }

    fn delete_batch(&self, table: Table, keys: &[Vec<u8>]) -> Result<(), StoreError> {
        let column = self.column(table);
        let mut data = column.data.write();
        for key in keys {
            data.remove(key);
        }
        drop(data);
        for key in keys {
            self.invalidate(table, key);
        }
        Ok(())
    }

    fn scan_range(
        &self,
        table: Table,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let data = self.column(table).data.read();
        Ok(data
            .range(start.to_vec()..end.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn execute(&self, ops: &[(Table, WriteOp)]) -> Result<(), StoreError> {
        // Validate before locking anything: atomicity by not starting.
        for (_, op) in ops {
            let key = match op {
                WriteOp::Insert { key, .. }
                | WriteOp::Update { key, .. }
                | WriteOp::Delete { key } => key,
            };
            if key.is_empty() {
                return Err(StoreError::InvalidKey);
            }
        }

        // Lock involved tables in canonical order.
        let mut involved: Vec<Table> = ops.iter().map(|(t, _)| *t).collect();
        involved.sort();
        involved.dedup();
        let guards: Vec<_> = involved
            .iter()
            .map(|t| (*t, self.column(*t).data.write()))
            .collect();
        let mut guards: std::collections::HashMap<Table, _> =
            guards.into_iter().collect();

        // Insert-collision check first so nothing partial lands.
        for (table, op) in ops {
            if let WriteOp::Insert { key, .. } = op {
                if guards
                    .get(table)
                    .is_some_and(|data| data.contains_key(key))
                {
                    return Err(StoreError::Backend(format!(
                        "insert collision in {:?}",
                        table
                    )));
                }
            }
        }

        for (table, op) in ops {
            let Some(data) = guards.get_mut(table) else {
                continue;
            };
            match op {
                WriteOp::Insert { key, value } | WriteOp::Update { key, value } => {
                    data.insert(key.clone(), value.clone());
                }
                WriteOp::Delete { key } => {
                    data.remove(key);
                }
            }
        }
        drop(guards);

        for (table, op) in ops {
            let key = match op {
                WriteOp::Insert { key, .. }
                | WriteOp::Update { key, .. }
                | WriteOp::Delete { key } => key,
            };
            self.invalidate(*table, key);
        }
        Ok(())
    }

    fn for_each(
        &self,
        table: Table,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<(), StoreError> {
        let data = self.column(table).data.read();
        for (key, value) in data.iter() {
            if !visit(key, value) {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[test]
    fn test_put_get_delete() {
        let store = MemoryStore::new();
        store.put(Table::Block, b"h1", b"block-1").unwrap();

        assert!(store.exists(Table::Block, b"h1").unwrap());
        assert_eq!(store.get(Table::Block, b"h1").unwrap().unwrap(), b"block-1");
        // Cached read returns the same bytes.
        assert_eq!(store.get(Table::Block, b"h1").unwrap().unwrap(), b"block-1");

        store.delete(Table::Block, b"h1").unwrap();
        assert!(!store.exists(Table::Block, b"h1").unwrap());
        assert!(store.get(Table::Block, b"h1").unwrap().is_none());
    }

    #[test]
    fn test_tables_are_isolated() {
        let store = MemoryStore::new();
        store.put(Table::Account, b"x", b"acct").unwrap();
        assert!(store.get(Table::Chain, b"x").unwrap().is_none());
    }

    #[test]
    fn test_empty_key_rejected() {
        let store = MemoryStore::new();
        assert_eq!(store.put(Table::Peer, b"", b"v"), Err(StoreError::InvalidKey));
        assert_eq!(store.get(Table::Peer, b""), Err(StoreError::InvalidKey));
    }

    #[test]
    fn test_put_overwrites_and_cache_stays_fresh() {
        let store = MemoryStore::new();
        store.put(Table::Chain, b"tip", b"1").unwrap();
        assert_eq!(store.get(Table::Chain, b"tip").unwrap().unwrap(), b"1");
        store.put(Table::Chain, b"tip", b"2").unwrap();
        assert_eq!(store.get(Table::Chain, b"tip").unwrap().unwrap(), b"2");
    }

    #[test]
    fn test_batch_ops_and_order() {
        let store = MemoryStore::new();
        store
            .put_batch(
                Table::Block,
                &[(k("a"), k("1")), (k("b"), k("2")), (k("c"), k("3"))],
            )
            .unwrap();

        let got = store
            .get_batch(Table::Block, &[k("c"), k("missing"), k("a")])
            .unwrap();
        assert_eq!(got, vec![Some(k("3")), None, Some(k("1"))]);

        store.delete_batch(Table::Block, &[k("a"), k("b")]).unwrap();
        assert_eq!(store.len(Table::Block), 1);
    }

    #[test]
    fn test_scan_range_half_open() {
        let store = MemoryStore::new();
        for key in ["a", "b", "c", "d"] {
            store.put(Table::Chain, key.as_bytes(), b"v").unwrap();
        }
        let hits = store.scan_range(Table::Chain, b"b", b"d").unwrap();
        let keys: Vec<_> = hits.iter().map(|(key, _)| key.clone()).collect();
        assert_eq!(keys, vec![k("b"), k("c")]);
    }

    #[test]
    fn test_execute_atomic_across_tables() {
        let store = MemoryStore::new();
        store
            .execute(&[
                (
                    Table::Block,
                    WriteOp::Insert {
                        key: k("h9"),
                        value: k("block"),
                    },
                ),
                (
                    Table::Chain,
                    WriteOp::Update {
                        key: k("tip"),
                        value: k("h9"),
                    },
                ),
            ])
            .unwrap();
        assert!(store.exists(Table::Block, b"h9").unwrap());
        assert_eq!(store.get(Table::Chain, b"tip").unwrap().unwrap(), k("h9"));
    }

    #[test]
    fn test_execute_insert_collision_applies_nothing() {
        let store = MemoryStore::new();
        store.put(Table::Block, b"h1", b"old").unwrap();

        let err = store
            .execute(&[
                (
                    Table::Chain,
                    WriteOp::Update {
                        key: k("tip"),
                        value: k("h1"),
                    },
                ),
                (
                    Table::Block,
                    WriteOp::Insert {
                        key: k("h1"),
                        value: k("new"),
                    },
                ),
            ])
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        // Nothing from the batch landed.
        assert!(store.get(Table::Chain, b"tip").unwrap().is_none());
        assert_eq!(store.get(Table::Block, b"h1").unwrap().unwrap(), b"old");
    }

    #[test]
    fn test_for_each_early_stop() {
        let store = MemoryStore::new();
        for key in ["a", "b", "c", "d"] {
            store.put(Table::Peer, key.as_bytes(), b"v").unwrap();
        }

        let mut visited = Vec::new();
        store
            .for_each(Table::Peer, &mut |key, _| {
                visited.push(key.to_vec());
                visited.len() < 2
            })
            .unwrap();
        assert_eq!(visited, vec![k("a"), k("b")]);
    }
}
