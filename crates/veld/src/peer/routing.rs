// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! XOR-distance routing table (k-bucket skeleton).
//!
//! 256 buckets by shared-prefix length against the local id, K=16 per
//! bucket, least-recently-seen at the front. Full buckets drop the
//! newcomer - the liveness-probe eviction dance is future work; the
//! table's job today is `closest()` for peer selection.

use parking_lot::Mutex;
use std::collections::VecDeque;

use super::PeerId;

/// Peers kept per bucket.
pub const BUCKET_SIZE: usize = 16;

const BUCKET_COUNT: usize = 256;

/// K-bucket table keyed by XOR distance from the local id.
pub struct RoutingTable {
    local: PeerId,
    buckets: Vec<Mutex<VecDeque<PeerId>>>,
}

impl RoutingTable {
    /// Table centered on `local`.
    #[must_use]
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            buckets: (0..BUCKET_COUNT).map(|_| Mutex::new(VecDeque::new())).collect(),
        }
    }

    /// The id this table is centered on.
    #[must_use]
    pub fn local_id(&self) -> &PeerId {
        &self.local
    }

    /// Record contact with a peer: refresh its recency, or append it if
    /// the bucket has room. Returns false when a full bucket dropped it.
    pub fn update(&self, peer: &PeerId) -> bool {
        let Some(index) = self.bucket_index(peer) else {
            return false; // our own id
        };
        let mut bucket = self.buckets[index].lock();

        if let Some(pos) = bucket.iter().position(|p| p == peer) {
            // Most recently seen moves to the back.
            let existing = bucket.remove(pos).unwrap_or(*peer);
            bucket.push_back(existing);
            return true;
        }
        if bucket.len() < BUCKET_SIZE {
            bucket.push_back(*peer);
            return true;
        }
        false
    }

    /// Forget a peer.
    pub fn remove(&self, peer: &PeerId) {
        if let Some(index) = self.bucket_index(peer) {
            self.buckets[index].lock().retain(|p| p != peer);
        }
    }

    /// The `n` known peers closest to `target` by XOR distance.
    #[must_use]
    pub fn closest(&self, target: &PeerId, n: usize) -> Vec<PeerId> {
        let mut all: Vec<PeerId> = self
            .buckets
            .iter()
            .flat_map(|bucket| bucket.lock().iter().copied().collect::<Vec<_>>())
            .collect();
        all.sort_by(|a, b| a.distance(target).cmp(&b.distance(target)));
        all.truncate(n);
        all
    }

    /// Total tracked peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.lock().len()).sum()
    }

    /// True when no peers are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bucket index by shared-prefix length; None for the local id
    /// itself.
    fn bucket_index(&self, peer: &PeerId) -> Option<usize> {
        let distance = self.local.distance(peer);
        let leading = distance.iter().try_fold(0usize, |acc, byte| {
            if *byte == 0 {
                Ok(acc + 8)
            } else {
                Err(acc + byte.leading_zeros() as usize)
            }
        });
        match leading {
            Ok(_) => None, // identical ids
            Err(zeros) => Some(BUCKET_COUNT - 1 - zeros),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(bytes: &[u8]) -> PeerId {
        let mut raw = [0u8; 32];
        raw[..bytes.len()].copy_from_slice(bytes);
        PeerId(raw)
    }

    #[test]
    fn test_update_and_len() {
        let table = RoutingTable::new(id(&[0]));
        assert!(table.update(&id(&[1])));
        assert!(table.update(&id(&[2])));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_local_id_is_never_tracked() {
        let local = id(&[7]);
        let table = RoutingTable::new(local);
        assert!(!table.update(&local));
        assert!(table.is_empty());
    }

    #[test]
    fn test_full_bucket_drops_newcomer() {
        let table = RoutingTable::new(id(&[0]));
        // All ids with the same first byte land in one bucket.
        let mut accepted = 0;
        for i in 0..BUCKET_SIZE + 4 {
            let mut raw = [0u8; 32];
            raw[0] = 0x80;
            raw[31] = i as u8;
            if table.update(&PeerId(raw)) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, BUCKET_SIZE);
    }

    #[test]
    fn test_reupdate_refreshes_not_duplicates() {
        let table = RoutingTable::new(id(&[0]));
        let peer = id(&[9]);
        assert!(table.update(&peer));
        assert!(table.update(&peer));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_closest_orders_by_xor_distance() {
        let table = RoutingTable::new(id(&[0]));
        let near = id(&[0b0000_0001]);
        let mid = id(&[0b0000_1000]);
        let far = id(&[0b1000_0000]);
        table.update(&far);
        table.update(&near);
        table.update(&mid);

        let target = id(&[0]);
        let closest = table.closest(&target, 2);
        assert_eq!(closest, vec![near, mid]);
    }

    #[test]
    fn test_remove_forgets_peer() {
        let table = RoutingTable::new(id(&[0]));
        let peer = id(&[3]);
        table.update(&peer);
        table.remove(&peer);
        assert!(table.is_empty());
    }
}
