// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! The endpoint: one UDP socket plus everything that serves it.
//!
//! Owns the socket, its single reader thread, the connection registry,
//! the response correlator, and the id generator - the "top-level
//! runtime value" the rest of the node receives explicitly instead of
//! process-wide globals.
//!
//! Inbound routing is by datagram source address: the reader derives the
//! local connection id for (local, src), resolves the connection, and
//! hands it the frame. Everything after that is the connection's
//! business.

use parking_lot::Mutex;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::connection::{Connection, ConnectionContext};
use super::correlator::ResponseCorrelator;
use super::filter::SendFilter;
use super::frame::{Frame, FrameType};
use super::registry::ConnectionRegistry;
use super::send_unit::{SendError, SendResult};
use super::udp::{bind_udp, canonical_local_addr, spawn_reader, UdpSender};
use super::{InboundHandler, MetricsSnapshot, TransportMetrics};
use crate::config::{
    RdtConfig, DELIVERED_DEDUP_CAPACITY, DELIVERED_DEDUP_TTL_MS, MAX_CONNECTIONS,
};
use crate::core::{Completion, IdGenerator, RequestId, TimerWheel, TtlMap};

/// Transport runtime bound to one UDP socket.
pub struct Endpoint {
    local_addr: SocketAddr,
    sender: Arc<UdpSender>,
    registry: Arc<ConnectionRegistry>,
    correlator: Arc<ResponseCorrelator>,
    ids: Arc<IdGenerator>,
    metrics: Arc<TransportMetrics>,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Endpoint {
    /// Bind a socket and start the reader thread.
    ///
    /// `upward` receives every reassembled payload. The correlator is
    /// passed in because the dispatcher above is typically built
    /// against the same instance. The caller keeps ownership of the
    /// wheel and shuts it down after the endpoint.
    pub fn bind(
        bind_addr: SocketAddr,
        cfg: RdtConfig,
        wheel: Arc<TimerWheel>,
        correlator: Arc<ResponseCorrelator>,
        upward: Arc<dyn InboundHandler>,
    ) -> io::Result<Arc<Self>> {
        let socket: Arc<UdpSocket> = Arc::new(bind_udp(bind_addr)?);
        let local_addr = canonical_local_addr(&socket)?;

        let metrics = Arc::new(TransportMetrics::default());
        let sender = Arc::new(UdpSender::new(Arc::clone(&socket), Arc::clone(&metrics)));
        let ids = Arc::new(IdGenerator::new());

        let ctx = Arc::new(ConnectionContext {
            sender: Arc::clone(&sender),
            wheel,
            ids: Arc::clone(&ids),
            correlator: Arc::clone(&correlator),
            upward,
            dedup: Arc::new(TtlMap::new(
                DELIVERED_DEDUP_CAPACITY,
                Duration::from_millis(DELIVERED_DEDUP_TTL_MS),
            )),
            metrics: Arc::clone(&metrics),
            cfg,
        });
        let registry = ConnectionRegistry::new(ctx, MAX_CONNECTIONS);

        let running = Arc::new(AtomicBool::new(true));
        let reader = {
            let registry = Arc::clone(&registry);
            spawn_reader(
                socket,
                Arc::clone(&running),
                Arc::clone(&metrics),
                move |frame, src| {
                    let conn = registry.get_or_create(local_addr, src, false);
                    conn.on_frame(&frame, src);
                },
            )?
        };

        log::info!("[endpoint] listening on {}", local_addr);
        Ok(Arc::new(Self {
            local_addr,
            sender,
            registry,
            correlator,
            ids,
            metrics,
            running,
            reader: Mutex::new(Some(reader)),
        }))
    }

    /// Canonical local address (connection ids derive from it).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The response correlator.
    #[must_use]
    pub fn correlator(&self) -> &Arc<ResponseCorrelator> {
        &self.correlator
    }

    /// The shared id generator.
    #[must_use]
    pub fn ids(&self) -> &Arc<IdGenerator> {
        &self.ids
    }

    /// Transport counter snapshot.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Install (or clear) the outbound frame filter. Test hook for loss
    /// injection; permissive when unset.
    pub fn set_send_filter(&self, filter: Option<Arc<dyn SendFilter>>) {
        self.sender.set_filter(filter);
    }

    /// Resolve (or create) the connection for `remote`.
    #[must_use]
    pub fn connection_to(&self, remote: SocketAddr) -> Arc<Connection> {
        self.registry.get_or_create(self.local_addr, remote, true)
    }

    /// Reliably send `payload` to `remote`. Returns the completion to
    /// wait on; never blocks the caller on the network.
    pub fn send_to(
        &self,
        remote: SocketAddr,
        payload: &[u8],
    ) -> Result<Arc<Completion<SendResult>>, SendError> {
        self.connection_to(remote).send_payload(payload)
    }

    /// Initiate a CONNECT exchange with `remote`.
    ///
    /// The returned completion fulfills when the CONNECT_RESPONSE
    /// arrives; the connection transitions to `Established` either way
    /// the handshake settles.
    pub fn connect(&self, remote: SocketAddr) -> io::Result<Arc<Completion<Vec<u8>>>> {
        let conn = self.connection_to(remote);
        let data_id = self.ids.next_id();
        // Register before transmit so a fast response cannot race the
        // correlator entry.
        let handle = self
            .correlator
            .register(RequestId::from_parts(conn.id(), data_id));
        let frame = Frame::control(conn.id(), data_id, FrameType::ConnectRequest, Vec::new());
        conn.transmit(&frame)?;
        Ok(handle)
    }

    /// Orderly shutdown: notify peers with OFF, close every connection,
    /// stop the reader.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        for conn in self.registry.values() {
            if let Err(err) = conn.send_control(FrameType::Off, Vec::new()) {
                log::debug!("[endpoint] off notify failed conn={:#x}: {}", conn.id(), err);
            }
        }
        self.registry.close_all();

        if let Some(reader) = self.reader.lock().take() {
            let _ = reader.join();
        }
        log::info!("[endpoint] shut down {}", self.local_addr);
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}
