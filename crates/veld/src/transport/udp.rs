// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! UDP socket construction and the frame reader thread.
//!
//! One socket per endpoint, shared between the single reader thread and
//! every sender via `Arc`. Sockets are built through `socket2` so we can
//! set `SO_REUSEADDR` before binding (same construction the discovery
//! ports use on restart-heavy deployments).

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::RwLock;

use super::filter::SendFilter;
use super::frame::Frame;
use super::TransportMetrics;
use crate::config::MAX_FRAME_LEN;

/// Reader poll granularity; bounds shutdown latency.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Build and bind the endpoint's UDP socket.
pub fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;

    let socket: UdpSocket = socket.into();
    log::debug!("[udp] bound {}", socket.local_addr()?);
    Ok(socket)
}

/// Canonical local endpoint for connection-id derivation.
///
/// A socket bound to the wildcard address reports `0.0.0.0`; substitute
/// the primary interface IP so both restart instances and the remote's
/// view of us derive against a real address.
pub fn canonical_local_addr(socket: &UdpSocket) -> io::Result<SocketAddr> {
    let bound = socket.local_addr()?;
    if !bound.ip().is_unspecified() {
        return Ok(bound);
    }
    match local_ip_address::local_ip() {
        Ok(ip) => Ok(SocketAddr::new(ip, bound.port())),
        Err(err) => {
            log::warn!(
                "[udp] interface discovery failed ({}); falling back to loopback",
                err
            );
            Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), bound.port()))
        }
    }
}

// ============================================================================
// Sender
// ============================================================================

/// Shared outbound path: filter, encode, send.
pub struct UdpSender {
    socket: Arc<UdpSocket>,
    filter: RwLock<Option<Arc<dyn SendFilter>>>,
    metrics: Arc<TransportMetrics>,
}

impl UdpSender {
    /// Wrap a bound socket.
    #[must_use]
    pub fn new(socket: Arc<UdpSocket>, metrics: Arc<TransportMetrics>) -> Self {
        Self {
            socket,
            filter: RwLock::new(None),
            metrics,
        }
    }

    /// Install (or clear) the outbound filter.
    pub fn set_filter(&self, filter: Option<Arc<dyn SendFilter>>) {
        *self.filter.write() = filter;
    }

    /// Encode and transmit one frame.
    ///
    /// A filtered frame is dropped silently and reported as success -
    /// indistinguishable from wire loss, which is the point.
    pub fn send_frame(&self, frame: &Frame, remote: SocketAddr) -> io::Result<()> {
        if let Some(filter) = self.filter.read().as_ref() {
            if !filter.allow(frame, remote) {
                self.metrics.incr_filtered();
                return Ok(());
            }
        }

        let wire = frame.encode();
        self.socket.send_to(&wire, remote)?;
        self.metrics.incr_frames_sent();

        #[cfg(feature = "trace")]
        log::trace!(
            "[udp] tx {:?} conn={:#x} data={} seq={}/{} -> {}",
            frame.frame_type,
            frame.connection_id,
            frame.data_id,
            frame.sequence,
            frame.total,
            remote
        );
        Ok(())
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Spawn the single reader thread for a socket.
///
/// Each datagram is decoded and handed to `on_frame` with its source
/// address; malformed datagrams are counted and dropped without
/// disturbing the loop. The thread exits when `running` clears.
pub fn spawn_reader<F>(
    socket: Arc<UdpSocket>,
    running: Arc<AtomicBool>,
    metrics: Arc<TransportMetrics>,
    on_frame: F,
) -> io::Result<JoinHandle<()>>
where
    F: Fn(Frame, SocketAddr) + Send + 'static,
{
    socket.set_read_timeout(Some(READ_TIMEOUT))?;

    std::thread::Builder::new()
        .name("veld-udp-reader".into())
        .spawn(move || {
            let mut buf = [0u8; MAX_FRAME_LEN + 64];
            while running.load(Ordering::Acquire) {
                let (len, src) = match socket.recv_from(&mut buf) {
                    Ok(pair) => pair,
                    Err(err)
                        if err.kind() == io::ErrorKind::WouldBlock
                            || err.kind() == io::ErrorKind::TimedOut =>
                    {
                        continue;
                    }
                    Err(err) => {
                        if running.load(Ordering::Acquire) {
                            log::warn!("[udp] recv error: {}", err);
                        }
                        continue;
                    }
                };

                match Frame::decode(&buf[..len]) {
                    Ok(frame) => {
                        metrics.incr_frames_received();
                        on_frame(frame, src);
                    }
                    Err(err) => {
                        metrics.incr_malformed();
                        log::debug!("[udp] dropped datagram from {}: {}", src, err);
                    }
                }
            }
            log::debug!("[udp] reader stopped");
        })
}
