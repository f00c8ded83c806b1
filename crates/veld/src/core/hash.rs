// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Murmur3-based derivations: connection ids and mempool shard indexes.
//!
//! Both derivations are local - neither value ever travels on the wire -
//! but they must be stable across restarts so that registry keys and
//! shard placement stay consistent for the same inputs.

use std::io::Cursor;
use std::net::SocketAddr;

/// Derive the local 63-bit connection id for a (local, remote) endpoint
/// pair.
///
/// `murmur3_128("ip:port-ip:port").lower64 & 0x7FFF_FFFF_FFFF_FFFF`.
/// The tuple is taken in natural (local, remote) order, so the two peers
/// of a flow derive *different* ids - each side keys its registry by its
/// own derivation.
#[must_use]
pub fn connection_id(local: SocketAddr, remote: SocketAddr) -> u64 {
    let key = format!("{}-{}", local, remote);
    let h = murmur3::murmur3_x64_128(&mut Cursor::new(key.as_bytes()), 0).unwrap_or_default();
    let id = (h as u64) & 0x7FFF_FFFF_FFFF_FFFF;
    // Zero is reserved as "no connection" in the frame header.
    if id == 0 {
        1
    } else {
        id
    }
}

/// Murmur3_32 of a transaction id, folded to a shard index.
///
/// `|murmur3_32(txId)| mod shard_count` with Java-style absolute value of
/// the signed 32-bit hash. `shard_count` must be a power of two.
#[must_use]
pub fn shard_index(tx_id: &str, shard_count: usize) -> usize {
    debug_assert!(shard_count.is_power_of_two());
    let h = murmur3::murmur3_32(&mut Cursor::new(tx_id.as_bytes()), 0).unwrap_or_default();
    (h as i32).unsigned_abs() as usize % shard_count
}

/// Expand a node name into a stable 32-byte peer id.
///
/// Two murmur3_128 passes with distinct seeds; purely a prototype
/// stand-in for the key-derivation collaborator.
#[must_use]
pub fn peer_id_bytes(name: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    let lo = murmur3::murmur3_x64_128(&mut Cursor::new(name.as_bytes()), 0).unwrap_or_default();
    let hi = murmur3::murmur3_x64_128(&mut Cursor::new(name.as_bytes()), 1).unwrap_or_default();
    out[..16].copy_from_slice(&lo.to_be_bytes());
    out[16..].copy_from_slice(&hi.to_be_bytes());
    out
}
