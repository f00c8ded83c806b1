// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Reliable datagram transport over UDP.
//!
//! A QUIC-like protocol providing connection-identified, reliable,
//! ordered-on-reassembly delivery of arbitrary byte payloads:
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                        Endpoint                              |
//! |  socket reader -> frame codec -> connection registry         |
//! +--------------------------------------------------------------+
//! |                       Connection                             |
//! |  heartbeat | frame dispatch | endpoint migration             |
//! +------------------------------+-------------------------------+
//! |   SendUnit (per dataId)      |   RecvUnit (per dataId)       |
//! |   fragment, retransmit,      |   dedup, gap requests,        |
//! |   batch dispatch, deadline   |   batched acks, reassembly    |
//! +------------------------------+-------------------------------+
//! ```
//!
//! Payloads fragment into ≤1024-byte DATA frames sharing a `dataId`.
//! Each frame retransmits on a 50 ms timer (budget 6); receivers demand
//! missing sequences with IMMEDIATE_REQUEST on the same cadence. One
//! absolute deadline per unit bounds the whole exchange. All timers run
//! on the shared [`crate::core::TimerWheel`].

pub mod connection;
pub mod correlator;
pub mod endpoint;
pub mod filter;
pub mod frame;
pub mod registry;
pub mod recv_unit;
pub mod send_unit;
pub mod udp;

pub use connection::Connection;
pub use correlator::ResponseCorrelator;
pub use endpoint::Endpoint;
pub use filter::SendFilter;
pub use frame::{AckBody, Frame, FrameError, FrameType, ImmediateRequestBody};
pub use registry::ConnectionRegistry;
pub use recv_unit::RecvFailure;
pub use send_unit::SendError;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Upward delivery seam: the transport hands each fully reassembled
/// payload to exactly one of these.
///
/// Implemented by the protocol dispatcher; tests install recorders.
pub trait InboundHandler: Send + Sync {
    /// Called once per reassembled payload, off the socket reader thread's
    /// critical path. `data_id` identifies the payload on this connection.
    fn on_payload(&self, conn: &Arc<Connection>, data_id: u64, payload: Vec<u8>);
}

/// Downward transmit seam for the per-payload state machines.
///
/// [`Connection`] implements this by resolving its current remote
/// address (endpoint migration) and handing the frame to the socket;
/// unit tests implement it with recorders and drop rules.
pub trait FrameTx: Send + Sync {
    /// Put one frame on the wire.
    fn transmit(&self, frame: &Frame) -> std::io::Result<()>;
}

// ============================================================================
// Metrics
// ============================================================================

/// Transport-wide counters. Cheap atomics, snapshot on demand.
#[derive(Debug, Default)]
pub struct TransportMetrics {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    retransmits: AtomicU64,
    acks_sent: AtomicU64,
    acks_received: AtomicU64,
    malformed_dropped: AtomicU64,
    filtered_dropped: AtomicU64,
    payloads_delivered: AtomicU64,
}

/// Point-in-time copy of [`TransportMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub retransmits: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub malformed_dropped: u64,
    pub filtered_dropped: u64,
    pub payloads_delivered: u64,
}

impl TransportMetrics {
    pub(crate) fn incr_frames_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_frames_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_retransmits(&self) {
        self.retransmits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_acks_sent(&self) {
        self.acks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_acks_received(&self) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_malformed(&self) {
        self.malformed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_filtered(&self) {
        self.filtered_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_delivered(&self) {
        self.payloads_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy out the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            retransmits: self.retransmits.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            filtered_dropped: self.filtered_dropped.load(Ordering::Relaxed),
            payloads_delivered: self.payloads_delivered.load(Ordering::Relaxed),
        }
    }
}
