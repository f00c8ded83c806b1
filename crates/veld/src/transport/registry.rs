// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! TTL-bounded registry of active connections.
//!
//! Keyed by the LOCAL connection-id derivation (§`core::hash`): 10k
//! capacity, 60 s idle-access TTL. Eviction - whether by TTL, capacity
//! pressure, or an explicit heartbeat verdict - synchronously closes the
//! connection (cancels units, releases buffers) under a wall-clock
//! budget.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use super::connection::{Connection, ConnectionContext};
use crate::core::{hash, ttl_map::EvictHook, TtlMap};

/// Concurrent connectionId -> [`Connection`] map with close-on-evict.
pub struct ConnectionRegistry {
    map: TtlMap<u64, Arc<Connection>>,
    ctx: Arc<ConnectionContext>,
}

impl ConnectionRegistry {
    /// Build a registry bounded by the context's transport knobs.
    #[must_use]
    pub fn new(ctx: Arc<ConnectionContext>, capacity: usize) -> Arc<Self> {
        let hook: EvictHook<u64, Arc<Connection>> = Arc::new(|id, conn| {
            log::debug!("[registry] evicting conn={:#x}", id);
            conn.close();
        });

        let ttl = Duration::from_millis(ctx.cfg.connection_idle_timeout_ms);
        Arc::new(Self {
            map: TtlMap::with_hook(capacity, ttl, Some(hook)),
            ctx,
        })
    }

    /// O(1) lookup by connection id; refreshes the idle TTL.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<Arc<Connection>> {
        self.map.get(&id)
    }

    /// Whether the registry currently tracks `id` (no TTL refresh).
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.map.contains(&id)
    }

    /// Resolve or create the connection for a (local, remote) pair.
    ///
    /// The id is derived per the local view; an existing connection is
    /// returned untouched (its remote may since have migrated).
    pub fn get_or_create(
        self: &Arc<Self>,
        local: SocketAddr,
        remote: SocketAddr,
        outbound: bool,
    ) -> Arc<Connection> {
        let id = hash::connection_id(local, remote);
        let conn = self.map.get_or_insert_with(id, || {
            log::debug!(
                "[registry] new conn={:#x} local={} remote={} outbound={}",
                id,
                local,
                remote,
                outbound
            );
            Connection::new(id, outbound, Some(remote), Arc::clone(&self.ctx))
        });
        conn.set_registry(Arc::downgrade(self));
        conn
    }

    /// Remove and close a connection (heartbeat verdict).
    pub fn evict(&self, id: u64) {
        if let Some(conn) = self.map.remove(&id) {
            log::info!("[registry] evicted unreachable conn={:#x}", id);
            conn.close();
        }
    }

    /// Remove and close a connection (orderly OFF / shutdown path).
    pub fn remove_and_close(&self, id: u64) {
        if let Some(conn) = self.map.remove(&id) {
            conn.close();
        }
    }

    /// Drop idle connections past their TTL, closing each. Returns the
    /// count evicted. Driven by the node's periodic sweep.
    pub fn prune(&self) -> usize {
        self.map.prune()
    }

    /// Snapshot of tracked connections.
    #[must_use]
    pub fn values(&self) -> Vec<Arc<Connection>> {
        self.map.values()
    }

    /// Close and drop every connection (endpoint shutdown).
    pub fn close_all(&self) {
        for conn in self.map.values() {
            self.map.remove(&conn.id());
            conn.close();
        }
    }

    /// Tracked connection count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no connections are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RdtConfig;
    use crate::core::{IdGenerator, TimerWheel, TtlMap};
    use crate::transport::correlator::ResponseCorrelator;
    use crate::transport::udp::{bind_udp, UdpSender};
    use crate::transport::{InboundHandler, TransportMetrics};

    struct NullHandler;
    impl InboundHandler for NullHandler {
        fn on_payload(&self, _conn: &Arc<Connection>, _data_id: u64, _payload: Vec<u8>) {}
    }

    fn make_ctx(idle_ms: u64) -> Arc<ConnectionContext> {
        let metrics = Arc::new(TransportMetrics::default());
        let socket = Arc::new(bind_udp("127.0.0.1:0".parse().unwrap()).unwrap());
        Arc::new(ConnectionContext {
            sender: Arc::new(UdpSender::new(socket, Arc::clone(&metrics))),
            wheel: TimerWheel::with_params(Duration::from_millis(5), 64, 1),
            ids: Arc::new(IdGenerator::new()),
            correlator: ResponseCorrelator::new(),
            upward: Arc::new(NullHandler),
            dedup: Arc::new(TtlMap::new(1024, Duration::from_secs(30))),
            metrics,
            cfg: RdtConfig {
                connection_idle_timeout_ms: idle_ms,
                ..RdtConfig::default()
            },
        })
    }

    fn addr(n: u8) -> SocketAddr {
        format!("10.0.0.{}:8333", n).parse().unwrap()
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let ctx = make_ctx(60_000);
        let registry = ConnectionRegistry::new(Arc::clone(&ctx), 16);

        let a = registry.get_or_create(addr(1), addr(2), true);
        let b = registry.get_or_create(addr(1), addr(2), true);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(a.id()));
        ctx.wheel.shutdown();
    }

    #[test]
    fn test_distinct_pairs_get_distinct_connections() {
        let ctx = make_ctx(60_000);
        let registry = ConnectionRegistry::new(Arc::clone(&ctx), 16);

        let a = registry.get_or_create(addr(1), addr(2), true);
        let b = registry.get_or_create(addr(1), addr(3), true);
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
        ctx.wheel.shutdown();
    }

    #[test]
    fn test_prune_closes_idle_connections() {
        let ctx = make_ctx(30);
        let registry = ConnectionRegistry::new(Arc::clone(&ctx), 16);
        let conn = registry.get_or_create(addr(1), addr(2), false);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(registry.prune(), 1);
        assert!(conn.is_closed());
        assert!(registry.is_empty());
        ctx.wheel.shutdown();
    }

    #[test]
    fn test_evict_closes_connection() {
        let ctx = make_ctx(60_000);
        let registry = ConnectionRegistry::new(Arc::clone(&ctx), 16);
        let conn = registry.get_or_create(addr(1), addr(2), false);

        registry.evict(conn.id());
        assert!(conn.is_closed());
        assert!(!registry.contains(conn.id()));
        ctx.wheel.shutdown();
    }

    #[test]
    fn test_close_all_drains_registry() {
        let ctx = make_ctx(60_000);
        let registry = ConnectionRegistry::new(Arc::clone(&ctx), 16);
        let a = registry.get_or_create(addr(1), addr(2), false);
        let b = registry.get_or_create(addr(1), addr(3), false);

        registry.close_all();
        assert!(a.is_closed() && b.is_closed());
        assert!(registry.is_empty());
        ctx.wheel.shutdown();
    }

    #[test]
    fn test_capacity_eviction_closes_victim() {
        let ctx = make_ctx(60_000);
        let registry = ConnectionRegistry::new(Arc::clone(&ctx), 2);

        let _a = registry.get_or_create(addr(1), addr(2), false);
        let _b = registry.get_or_create(addr(1), addr(3), false);
        let _c = registry.get_or_create(addr(1), addr(4), false);
        assert!(registry.len() <= 2);
        ctx.wheel.shutdown();
    }
}
