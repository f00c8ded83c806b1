// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Peer identity, registry, and persistence.
//!
//! Peers are identified by a 32-byte id (public-key derived upstream;
//! opaque here). The registry tracks live address/recency state and
//! feeds the routing table; [`PeerStore`] round-trips the set through
//! the KV interface's Peer table across restarts.

pub mod routing;

pub use routing::{RoutingTable, BUCKET_SIZE};

use dashmap::DashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::store::{KvStore, StoreError, Table};

/// 32-byte peer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Parse from a byte slice (must be exactly 32 bytes).
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(raw))
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Byte-wise XOR distance to another id.
    #[must_use]
    pub fn distance(&self, other: &PeerId) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..")
    }
}

/// What the node knows about one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Identity.
    pub id: PeerId,
    /// Last known UDP endpoint.
    pub addr: SocketAddr,
    /// Last contact (ms since epoch).
    pub last_seen_ms: u64,
}

impl PeerInfo {
    fn encode(&self) -> Vec<u8> {
        let addr = self.addr.to_string();
        let mut buf = Vec::with_capacity(8 + 2 + addr.len());
        buf.extend_from_slice(&self.last_seen_ms.to_be_bytes());
        buf.extend_from_slice(&(addr.len() as u16).to_be_bytes());
        buf.extend_from_slice(addr.as_bytes());
        buf
    }

    fn decode(id: PeerId, buf: &[u8]) -> Option<Self> {
        if buf.len() < 10 {
            return None;
        }
        let last_seen_ms = u64::from_be_bytes(buf[0..8].try_into().ok()?);
        let addr_len = u16::from_be_bytes(buf[8..10].try_into().ok()?) as usize;
        if buf.len() != 10 + addr_len {
            return None;
        }
        let addr = std::str::from_utf8(&buf[10..]).ok()?.parse().ok()?;
        Some(Self {
            id,
            addr,
            last_seen_ms,
        })
    }
}

/// Live peer set plus routing table.
pub struct PeerRegistry {
    peers: DashMap<PeerId, PeerInfo>,
    routing: RoutingTable,
}

impl PeerRegistry {
    /// Registry centered on the local node id.
    #[must_use]
    pub fn new(local: PeerId) -> Self {
        Self {
            peers: DashMap::new(),
            routing: RoutingTable::new(local),
        }
    }

    /// Record (or refresh) contact with a peer.
    pub fn record(&self, id: PeerId, addr: SocketAddr, now_ms: u64) {
        self.peers.insert(
            id,
            PeerInfo {
                id,
                addr,
                last_seen_ms: now_ms,
            },
        );
        self.routing.update(&id);
    }

    /// Look up a peer.
    #[must_use]
    pub fn get(&self, id: &PeerId) -> Option<PeerInfo> {
        self.peers.get(id).map(|p| p.value().clone())
    }

    /// Forget a peer entirely.
    pub fn remove(&self, id: &PeerId) {
        self.peers.remove(id);
        self.routing.remove(id);
    }

    /// The `n` known peers closest to `target`.
    #[must_use]
    pub fn closest(&self, target: &PeerId, n: usize) -> Vec<PeerInfo> {
        self.routing
            .closest(target, n)
            .into_iter()
            .filter_map(|id| self.get(&id))
            .collect()
    }

    /// Tracked peer count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True when no peers are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Snapshot of every tracked peer.
    #[must_use]
    pub fn all(&self) -> Vec<PeerInfo> {
        self.peers.iter().map(|p| p.value().clone()).collect()
    }
}

/// Persists the peer set through the KV interface.
pub struct PeerStore {
    store: Arc<dyn KvStore>,
}

impl PeerStore {
    /// Store-backed persistence.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Write every registry entry to the Peer table.
    pub fn save(&self, registry: &PeerRegistry) -> Result<(), StoreError> {
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = registry
            .all()
            .into_iter()
            .map(|info| (info.id.as_bytes().to_vec(), info.encode()))
            .collect();
        self.store.put_batch(Table::Peer, &pairs)
    }

    /// Load persisted peers into the registry. Returns the count
    /// loaded; undecodable records are skipped with a log line.
    pub fn load_into(&self, registry: &PeerRegistry) -> Result<usize, StoreError> {
        let mut loaded = 0;
        self.store.for_each(Table::Peer, &mut |key, value| {
            match PeerId::from_bytes(key).and_then(|id| PeerInfo::decode(id, value)) {
                Some(info) => {
                    registry.record(info.id, info.addr, info.last_seen_ms);
                    loaded += 1;
                }
                None => log::warn!("[peer] skipping undecodable peer record"),
            }
            true
        })?;
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn pid(seed: u8) -> PeerId {
        let mut raw = [0u8; 32];
        raw[0] = seed;
        raw[31] = seed;
        PeerId(raw)
    }

    fn addr(port: u16) -> SocketAddr {
        format!("10.1.1.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_record_get_remove() {
        let registry = PeerRegistry::new(pid(0));
        registry.record(pid(1), addr(8333), 1000);

        let info = registry.get(&pid(1)).unwrap();
        assert_eq!(info.addr, addr(8333));
        assert_eq!(info.last_seen_ms, 1000);

        // Refresh updates address and recency.
        registry.record(pid(1), addr(9000), 2000);
        let info = registry.get(&pid(1)).unwrap();
        assert_eq!(info.addr, addr(9000));
        assert_eq!(registry.len(), 1);

        registry.remove(&pid(1));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_closest_returns_known_peers() {
        let registry = PeerRegistry::new(pid(0));
        for i in 1..6 {
            registry.record(pid(i), addr(8333), 0);
        }
        let closest = registry.closest(&pid(1), 3);
        assert_eq!(closest.len(), 3);
        assert_eq!(closest[0].id, pid(1));
    }

    #[test]
    fn test_peer_store_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let peer_store = PeerStore::new(Arc::<MemoryStore>::clone(&store) as Arc<dyn KvStore>);

        let registry = PeerRegistry::new(pid(0));
        registry.record(pid(1), addr(8333), 111);
        registry.record(pid(2), "[::1]:9000".parse().unwrap(), 222);
        peer_store.save(&registry).unwrap();

        let restored = PeerRegistry::new(pid(0));
        let loaded = peer_store.load_into(&restored).unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(restored.get(&pid(1)).unwrap().addr, addr(8333));
        assert_eq!(restored.get(&pid(2)).unwrap().last_seen_ms, 222);
    }
}
