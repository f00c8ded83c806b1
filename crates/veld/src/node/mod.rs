// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Node runtime: the top-level value that owns everything.
//!
//! Where the core subsystems are libraries, [`Node`] is the wiring: it
//! builds the timer wheel, correlator, mempool, dispatcher, and
//! endpoint in dependency order, registers the built-in protocol
//! handlers, and drives the periodic jobs (mempool expiry sweep,
//! registry prune, correlator prune). Nothing in the process is a
//! global - everything flows from this value.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{
    NodeConfig, RuntimeConfig, CORRELATOR_PRUNE_INTERVAL_MS, MEMPOOL_SWEEP_INTERVAL_MS,
    REGISTRY_PRUNE_INTERVAL_MS,
};
use crate::core::{hash, Completion, TimerWheel};
use crate::mempool::{now_ms, AdmitError, Mempool, Transaction};
use crate::peer::{PeerId, PeerRegistry, PeerStore};
use crate::protocol::handlers::{
    HandshakeHandler, PingHandler, StoreQueryHandler, TextHandler, TxSubmitHandler,
};
use crate::protocol::{self, DispatcherBuilder, ProtocolTag};
use crate::store::KvStore;
use crate::transport::{Endpoint, ResponseCorrelator, SendError};

/// A running node.
pub struct Node {
    name: String,
    config: Arc<RuntimeConfig>,
    wheel: Arc<TimerWheel>,
    endpoint: Arc<Endpoint>,
    mempool: Arc<Mempool>,
    peers: Arc<PeerRegistry>,
    store: Arc<dyn KvStore>,
    running: Arc<AtomicBool>,
}

impl Node {
    /// Bring up a node: bind the endpoint, register handlers, load
    /// persisted peers, start the periodic jobs.
    pub fn start(name: &str, config: NodeConfig, store: Arc<dyn KvStore>) -> io::Result<Self> {
        let wheel = TimerWheel::start();
        let correlator = ResponseCorrelator::new();
        let mempool = Arc::new(Mempool::new(config.mempool.clone()));

        let dispatcher = DispatcherBuilder::new()
            .returning(
                ProtocolTag::TxSubmitV1,
                Arc::new(TxSubmitHandler::new(Arc::clone(&mempool))),
            )
            .returning(ProtocolTag::PingV1, Arc::new(PingHandler))
            .returning(
                ProtocolTag::HandshakeV1,
                Arc::new(HandshakeHandler::new(name.to_string(), config.udp_port)),
            )
            .returning(
                ProtocolTag::BlockQueryV1,
                Arc::new(StoreQueryHandler::blocks(Arc::clone(&store))),
            )
            .returning(
                ProtocolTag::ChainQueryV1,
                Arc::new(StoreQueryHandler::chain(Arc::clone(&store))),
            )
            .void(ProtocolTag::TextV1, Arc::new(TextHandler))
            .build(Arc::clone(&correlator));

        let bind_addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], config.udp_port));
        let endpoint = Endpoint::bind(
            bind_addr,
            config.rdt.clone(),
            Arc::clone(&wheel),
            correlator,
            dispatcher,
        )?;

        let peers = Arc::new(PeerRegistry::new(PeerId(hash::peer_id_bytes(name))));
        match PeerStore::new(Arc::clone(&store)).load_into(&peers) {
            Ok(0) => {}
            Ok(n) => log::info!("[node] loaded {} persisted peers", n),
            Err(err) => log::warn!("[node] peer load failed: {}", err),
        }

        let running = Arc::new(AtomicBool::new(true));
        let node = Self {
            name: name.to_string(),
            config: Arc::new(RuntimeConfig::new(config)),
            wheel,
            endpoint,
            mempool,
            peers,
            store,
            running,
        };
        node.start_jobs();

        log::info!(
            "[node] {} up on {} (mempool: {} shards)",
            node.name,
            node.endpoint.local_addr(),
            node.mempool.config().shard_count
        );
        Ok(node)
    }

    fn start_jobs(&self) {
        let mempool = Arc::clone(&self.mempool);
        schedule_recurring(
            &self.wheel,
            Arc::clone(&self.running),
            Duration::from_millis(MEMPOOL_SWEEP_INTERVAL_MS),
            move || {
                mempool.clean_expired(now_ms());
            },
        );

        let registry = Arc::clone(self.endpoint.registry());
        schedule_recurring(
            &self.wheel,
            Arc::clone(&self.running),
            Duration::from_millis(REGISTRY_PRUNE_INTERVAL_MS),
            move || {
                registry.prune();
            },
        );

        let correlator = Arc::clone(self.endpoint.correlator());
        schedule_recurring(
            &self.wheel,
            Arc::clone(&self.running),
            Duration::from_millis(CORRELATOR_PRUNE_INTERVAL_MS),
            move || {
                correlator.prune();
            },
        );
    }

    /// Node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runtime configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<RuntimeConfig> {
        &self.config
    }

    /// The transport endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// The mempool.
    #[must_use]
    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    /// The peer registry.
    #[must_use]
    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.peers
    }

    /// The persistence handle.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Admit a locally produced transaction.
    pub fn submit_local(&self, tx: Transaction) -> Result<(), AdmitError> {
        self.mempool.add(tx)
    }

    /// Issue a protocol request to a peer.
    pub fn request(
        &self,
        remote: SocketAddr,
        tag: ProtocolTag,
        body: Vec<u8>,
    ) -> Result<Arc<Completion<Vec<u8>>>, SendError> {
        protocol::send_request(&self.endpoint, remote, tag, body)
    }

    /// Orderly shutdown: persist peers, stop the endpoint and timers.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = PeerStore::new(Arc::clone(&self.store)).save(&self.peers) {
            log::warn!("[node] peer persist failed: {}", err);
        }
        self.endpoint.shutdown();
        self.wheel.shutdown();
        log::info!("[node] {} stopped", self.name);
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run `job` every `interval` on the wheel until `running` clears.
fn schedule_recurring<F>(
    wheel: &Arc<TimerWheel>,
    running: Arc<AtomicBool>,
    interval: Duration,
    job: F,
) where
    F: Fn() + Send + Sync + 'static,
{
    let weak_wheel = Arc::downgrade(wheel);
    let job = Arc::new(job);

    fn tick<F>(
        weak_wheel: &std::sync::Weak<TimerWheel>,
        running: &Arc<AtomicBool>,
        interval: Duration,
        job: &Arc<F>,
    ) where
        F: Fn() + Send + Sync + 'static,
    {
        if !running.load(Ordering::Acquire) {
            return;
        }
        job();
        let Some(wheel) = weak_wheel.upgrade() else {
            return;
        };
        let weak_wheel = weak_wheel.clone();
        let running = Arc::clone(running);
        let job = Arc::clone(job);
        wheel.schedule(interval, move || {
            tick(&weak_wheel, &running, interval, &job);
        });
    }

    let Some(wheel_arc) = weak_wheel.upgrade() else {
        return;
    };
    let running_clone = Arc::clone(&running);
    let job_clone = Arc::clone(&job);
    let weak = weak_wheel.clone();
    wheel_arc.schedule(interval, move || {
        tick(&weak, &running_clone, interval, &job_clone);
    });
}
