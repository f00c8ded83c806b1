// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Key-value persistence interface.
//!
//! The node CONSUMES this surface; the production column-family engine
//! is an external collaborator. Everything above it (query handlers,
//! peer store, tools) talks through [`KvStore`], and the in-memory
//! implementation in [`memory`] backs tests and the standalone node.
//!
//! Tables are a closed set, each with its own read-cache policy.

pub mod memory;

pub use memory::MemoryStore;

use std::fmt;
use std::time::Duration;

/// Column tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    /// Account state.
    Account,
    /// Chain metadata (tips, heights, checkpoints).
    Chain,
    /// Full blocks by hash.
    Block,
    /// Known peers.
    Peer,
}

impl Table {
    /// Every table, in lock-acquisition order.
    pub const ALL: [Table; 4] = [Table::Account, Table::Chain, Table::Block, Table::Peer];

    /// Read-cache policy for this table.
    #[must_use]
    pub fn cache_policy(self) -> CachePolicy {
        match self {
            // Account state is hot and small.
            Table::Account => CachePolicy {
                capacity: 16_384,
                ttl: Duration::from_secs(300),
            },
            Table::Chain => CachePolicy {
                capacity: 1_024,
                ttl: Duration::from_secs(60),
            },
            // Blocks are big; keep the cache shallow.
            Table::Block => CachePolicy {
                capacity: 256,
                ttl: Duration::from_secs(600),
            },
            Table::Peer => CachePolicy {
                capacity: 4_096,
                ttl: Duration::from_secs(120),
            },
        }
    }
}

/// Per-table read-cache bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Maximum cached entries.
    pub capacity: usize,
    /// Entry lifetime.
    pub ttl: Duration,
}

/// Store failure, propagated to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing engine reported a failure.
    Backend(String),
    /// A key violates the table's constraints.
    InvalidKey,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(msg) => write!(f, "store backend error: {}", msg),
            StoreError::InvalidKey => write!(f, "invalid key"),
        }
    }
}

impl std::error::Error for StoreError {}

/// One mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert a fresh key (fails the batch if present).
    Insert { key: Vec<u8>, value: Vec<u8> },
    /// Upsert a key.
    Update { key: Vec<u8>, value: Vec<u8> },
    /// Remove a key (absent is fine).
    Delete { key: Vec<u8> },
}

/// The persistence seam.
pub trait KvStore: Send + Sync {
    /// Whether `key` exists in `table`.
    fn exists(&self, table: Table, key: &[u8]) -> Result<bool, StoreError>;

    /// Read one value.
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write one value.
    fn put(&self, table: Table, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Delete one key (absent is fine).
    fn delete(&self, table: Table, key: &[u8]) -> Result<(), StoreError>;

    /// Read many keys, preserving order (`None` per missing key).
    fn get_batch(&self, table: Table, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, StoreError>;

    /// Write many pairs.
    fn put_batch(&self, table: Table, pairs: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError>;

    /// Delete many keys.
    fn delete_batch(&self, table: Table, keys: &[Vec<u8>]) -> Result<(), StoreError>;

    /// All pairs with `start <= key < end`, key order.
    fn scan_range(
        &self,
        table: Table,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Apply a multi-table batch atomically: either every op lands or
    /// none does.
    fn execute(&self, ops: &[(Table, WriteOp)]) -> Result<(), StoreError>;

    /// Visit pairs in key order until `visit` returns false.
    fn for_each(
        &self,
        table: Table,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<(), StoreError>;
}
