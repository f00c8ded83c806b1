// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Type-coded request/response dispatch over the transport.
//!
//! Every reassembled payload is an envelope:
//!
//! ```text
//! tag:u8 | flags:u8 (bit0 = response) | requestId:[u8;16] | body
//! ```
//!
//! Requests route to the handler registered for their tag; responses
//! complete the correlator entry for their request id. Handlers come in
//! two shapes - returning (the framework ships the response back on the
//! same connection under a fresh dataId) and void. The registry is
//! built once at startup and immutable afterwards. Unknown tags are
//! logged and dropped.

pub mod handlers;

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::core::{Completion, RequestId};
use crate::transport::{
    Connection, Endpoint, InboundHandler, ResponseCorrelator, SendError,
};

// ============================================================================
// Tags & envelope
// ============================================================================

/// Versioned request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolTag {
    /// Node identity exchange.
    HandshakeV1 = 0x01,
    /// Application-level liveness probe (distinct from transport PING).
    PingV1 = 0x02,
    /// Free-form text message.
    TextV1 = 0x03,
    /// Transaction submission into the mempool.
    TxSubmitV1 = 0x04,
    /// Block lookup by key.
    BlockQueryV1 = 0x05,
    /// Chain metadata lookup by key.
    ChainQueryV1 = 0x06,
}

impl ProtocolTag {
    /// Parse a wire tag.
    #[must_use]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::HandshakeV1),
            0x02 => Some(Self::PingV1),
            0x03 => Some(Self::TextV1),
            0x04 => Some(Self::TxSubmitV1),
            0x05 => Some(Self::BlockQueryV1),
            0x06 => Some(Self::ChainQueryV1),
            _ => None,
        }
    }
}

/// Dispatch failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Payload shorter than the envelope header.
    Truncated,
    /// No handler registered for the tag.
    UnknownProtocol(u8),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Truncated => write!(f, "truncated envelope"),
            DispatchError::UnknownProtocol(tag) => write!(f, "unknown protocol tag {:#04x}", tag),
        }
    }
}

impl std::error::Error for DispatchError {}

const ENVELOPE_HEADER_LEN: usize = 1 + 1 + 16;
const FLAG_RESPONSE: u8 = 0b0000_0001;

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Raw tag byte (kept raw so responses echo unknown versions
    /// faithfully).
    pub tag: u8,
    /// Response flag.
    pub is_response: bool,
    /// Correlates a response with its request.
    pub request_id: RequestId,
    /// Handler-defined body.
    pub body: Vec<u8>,
}

impl Envelope {
    /// Request envelope.
    #[must_use]
    pub fn request(tag: ProtocolTag, request_id: RequestId, body: Vec<u8>) -> Self {
        Self {
            tag: tag as u8,
            is_response: false,
            request_id,
            body,
        }
    }

    /// Response envelope echoing the request's tag and id.
    #[must_use]
    pub fn response(tag: u8, request_id: RequestId, body: Vec<u8>) -> Self {
        Self {
            tag,
            is_response: true,
            request_id,
            body,
        }
    }

    /// Encode to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENVELOPE_HEADER_LEN + self.body.len());
        buf.push(self.tag);
        buf.push(if self.is_response { FLAG_RESPONSE } else { 0 });
        buf.extend_from_slice(self.request_id.as_bytes());
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Decode from a reassembled payload.
    pub fn decode(buf: &[u8]) -> Result<Self, DispatchError> {
        if buf.len() < ENVELOPE_HEADER_LEN {
            return Err(DispatchError::Truncated);
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&buf[2..18]);
        Ok(Self {
            tag: buf[0],
            is_response: buf[1] & FLAG_RESPONSE != 0,
            request_id: RequestId(id),
            body: buf[ENVELOPE_HEADER_LEN..].to_vec(),
        })
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// What a handler learns about the request's origin.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    /// Local connection id the request arrived on.
    pub connection_id: u64,
    /// Transport dataId of the reassembled payload.
    pub data_id: u64,
    /// Peer address at arrival time.
    pub remote: Option<SocketAddr>,
}

/// Handler producing an optional response body.
pub trait ReturningHandler: Send + Sync {
    /// Process a request; `Some(body)` is shipped back to the caller.
    fn handle(&self, ctx: &RequestContext, body: &[u8]) -> Option<Vec<u8>>;
}

/// Handler with no response.
pub trait VoidHandler: Send + Sync {
    /// Process a one-way message.
    fn handle(&self, ctx: &RequestContext, body: &[u8]);
}

/// The two handler shapes, tagged.
#[derive(Clone)]
pub enum Handler {
    /// Framework sends the returned bytes back, correlated by the
    /// original request id.
    Returning(Arc<dyn ReturningHandler>),
    /// Fire-and-forget.
    Void(Arc<dyn VoidHandler>),
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Builds the immutable tag -> handler table.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<u8, Handler>,
}

impl DispatcherBuilder {
    /// Empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a returning handler for `tag`.
    #[must_use]
    pub fn returning(mut self, tag: ProtocolTag, handler: Arc<dyn ReturningHandler>) -> Self {
        self.handlers.insert(tag as u8, Handler::Returning(handler));
        self
    }

    /// Register a void handler for `tag`.
    #[must_use]
    pub fn void(mut self, tag: ProtocolTag, handler: Arc<dyn VoidHandler>) -> Self {
        self.handlers.insert(tag as u8, Handler::Void(handler));
        self
    }

    /// Freeze the table.
    #[must_use]
    pub fn build(self, correlator: Arc<ResponseCorrelator>) -> Arc<Dispatcher> {
        Arc::new(Dispatcher {
            handlers: self.handlers,
            correlator,
        })
    }
}

/// Routes reassembled payloads to handlers and completes response
/// futures. Immutable once built.
pub struct Dispatcher {
    handlers: HashMap<u8, Handler>,
    correlator: Arc<ResponseCorrelator>,
}

impl Dispatcher {
    /// Number of registered tags.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    fn dispatch(&self, conn: &Arc<Connection>, data_id: u64, envelope: Envelope) {
        if envelope.is_response {
            if !self.correlator.complete(&envelope.request_id, envelope.body) {
                log::debug!(
                    "[dispatch] response for unknown request {}",
                    envelope.request_id
                );
            }
            return;
        }

        let Some(handler) = self.handlers.get(&envelope.tag) else {
            log::warn!(
                "[dispatch] {}",
                DispatchError::UnknownProtocol(envelope.tag)
            );
            return;
        };

        let ctx = RequestContext {
            connection_id: conn.id(),
            data_id,
            remote: conn.remote(),
        };

        match handler {
            Handler::Void(h) => {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    h.handle(&ctx, &envelope.body);
                }));
                if result.is_err() {
                    log::warn!("[dispatch] handler panicked tag={:#04x}", envelope.tag);
                }
            }
            Handler::Returning(h) => {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    h.handle(&ctx, &envelope.body)
                }));
                let response = match result {
                    Ok(response) => response,
                    Err(_) => {
                        log::warn!("[dispatch] handler panicked tag={:#04x}", envelope.tag);
                        return;
                    }
                };
                if let Some(body) = response {
                    let reply = Envelope::response(envelope.tag, envelope.request_id, body);
                    match conn.send_payload(&reply.encode()) {
                        Ok(_completion) => {}
                        Err(err) => log::debug!(
                            "[dispatch] response send failed conn={:#x}: {}",
                            conn.id(),
                            err
                        ),
                    }
                }
            }
        }
    }
}

impl InboundHandler for Dispatcher {
    fn on_payload(&self, conn: &Arc<Connection>, data_id: u64, payload: Vec<u8>) {
        match Envelope::decode(&payload) {
            Ok(envelope) => self.dispatch(conn, data_id, envelope),
            Err(err) => log::debug!("[dispatch] dropped payload: {}", err),
        }
    }
}

// ============================================================================
// Caller surface
// ============================================================================

/// Issue a request to `remote` and obtain the response future.
///
/// Registers the request id before the payload leaves, so even an
/// instant response finds its completion.
pub fn send_request(
    endpoint: &Endpoint,
    remote: SocketAddr,
    tag: ProtocolTag,
    body: Vec<u8>,
) -> Result<Arc<Completion<Vec<u8>>>, SendError> {
    let request_id = RequestId::from_parts(endpoint.ids().next_id(), endpoint.ids().next_id());
    let handle = endpoint.correlator().register(request_id);

    let envelope = Envelope::request(tag, request_id, body);
    let _send = endpoint.send_to(remote, &envelope.encode())?;
    Ok(handle)
}

/// Fire a one-way message at `remote` (no response expected).
pub fn send_oneway(
    endpoint: &Endpoint,
    remote: SocketAddr,
    tag: ProtocolTag,
    body: Vec<u8>,
) -> Result<(), SendError> {
    let request_id = RequestId::from_parts(endpoint.ids().next_id(), endpoint.ids().next_id());
    let envelope = Envelope::request(tag, request_id, body);
    endpoint.send_to(remote, &envelope.encode())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let env = Envelope::request(
            ProtocolTag::TxSubmitV1,
            RequestId::from_parts(1, 2),
            b"body".to_vec(),
        );
        let decoded = Envelope::decode(&env.encode()).unwrap();
        assert_eq!(decoded, env);
        assert!(!decoded.is_response);
    }

    #[test]
    fn test_response_flag_roundtrip() {
        let env = Envelope::response(0x05, RequestId::from_parts(3, 4), vec![1, 2]);
        let decoded = Envelope::decode(&env.encode()).unwrap();
        assert!(decoded.is_response);
        assert_eq!(decoded.tag, 0x05);
    }

    #[test]
    fn test_truncated_envelope_rejected() {
        for len in 0..ENVELOPE_HEADER_LEN {
            assert_eq!(
                Envelope::decode(&vec![0u8; len]),
                Err(DispatchError::Truncated)
            );
        }
    }

    #[test]
    fn test_tag_parse() {
        assert_eq!(ProtocolTag::from_u8(0x04), Some(ProtocolTag::TxSubmitV1));
        assert_eq!(ProtocolTag::from_u8(0xFF), None);
    }

    #[test]
    fn test_builder_registers_both_shapes() {
        struct Echo;
        impl ReturningHandler for Echo {
            fn handle(&self, _ctx: &RequestContext, body: &[u8]) -> Option<Vec<u8>> {
                Some(body.to_vec())
            }
        }
        struct Sink;
        impl VoidHandler for Sink {
            fn handle(&self, _ctx: &RequestContext, _body: &[u8]) {}
        }

        let dispatcher = DispatcherBuilder::new()
            .returning(ProtocolTag::PingV1, Arc::new(Echo))
            .void(ProtocolTag::TextV1, Arc::new(Sink))
            .build(ResponseCorrelator::new());
        assert_eq!(dispatcher.handler_count(), 2);
    }
}
