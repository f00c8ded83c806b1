// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Monotonic id generation for data units and request correlation.
//!
//! Every reliably sent payload gets a fresh nonzero 64-bit `dataId`;
//! application requests get a 16-byte request id. Ids are process-local:
//! the wire protocol only requires uniqueness per (connection, direction)
//! within a unit's lifetime, which a shared monotonic counter gives with
//! a wide margin.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic 64-bit id source.
///
/// Starts at 1 - zero is reserved as "no id" in the frame header.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a generator starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Next nonzero id.
    ///
    /// Wraps around u64::MAX back to 1 (skipping 0). In practice a node
    /// never exhausts the space.
    pub fn next_id(&self) -> u64 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// 16-byte request id correlating a request with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub [u8; 16]);

impl RequestId {
    /// Build a request id from a (connectionId, dataId) pair.
    ///
    /// Used for transport-level correlation (PING/PONG, CONNECT): the
    /// initiator knows both halves, and the echoed dataId reconstructs
    /// the same id on response arrival.
    #[must_use]
    pub fn from_parts(connection_id: u64, data_id: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&connection_id.to_be_bytes());
        bytes[8..].copy_from_slice(&data_id.to_be_bytes());
        Self(bytes)
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
