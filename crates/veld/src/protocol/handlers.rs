// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Built-in protocol handlers.
//!
//! Registered at node startup; each is a thin adapter from envelope
//! bodies to a subsystem (mempool, store, peer registry). Response
//! bodies lead with a status byte where the operation can fail.

use std::sync::Arc;

use super::{RequestContext, ReturningHandler, VoidHandler};
use crate::mempool::{AdmitError, Mempool, Transaction};
use crate::store::{KvStore, Table};

/// Status byte for successful operations.
pub const STATUS_OK: u8 = 0;

/// Submission outcomes on the wire.
#[must_use]
pub fn admit_status(err: AdmitError) -> u8 {
    match err {
        AdmitError::GlobalFull => 1,
        AdmitError::ShardFull => 2,
        AdmitError::Duplicate => 3,
        AdmitError::Invalid => 4,
    }
}

// ============================================================================
// Transaction submit
// ============================================================================

/// Decodes a transaction and admits it into the mempool. Returns a
/// single status byte so the submitter observes the structured outcome.
pub struct TxSubmitHandler {
    mempool: Arc<Mempool>,
}

impl TxSubmitHandler {
    /// Handler over the node's pool.
    #[must_use]
    pub fn new(mempool: Arc<Mempool>) -> Self {
        Self { mempool }
    }
}

impl ReturningHandler for TxSubmitHandler {
    fn handle(&self, ctx: &RequestContext, body: &[u8]) -> Option<Vec<u8>> {
        let tx = match Transaction::decode(body) {
            Ok(tx) => tx,
            Err(err) => {
                log::debug!(
                    "[handler] undecodable transaction from conn={:#x}: {}",
                    ctx.connection_id,
                    err
                );
                return Some(vec![admit_status(AdmitError::Invalid)]);
            }
        };

        match self.mempool.add(tx) {
            Ok(()) => Some(vec![STATUS_OK]),
            Err(err) => {
                log::debug!("[handler] submit refused: {}", err);
                Some(vec![admit_status(err)])
            }
        }
    }
}

// ============================================================================
// Text
// ============================================================================

/// One-way text messages; logged, never answered.
pub struct TextHandler;

impl VoidHandler for TextHandler {
    fn handle(&self, ctx: &RequestContext, body: &[u8]) {
        let text = String::from_utf8_lossy(body);
        log::info!(
            "[handler] text from conn={:#x}: {}",
            ctx.connection_id,
            text
        );
    }
}

// ============================================================================
// Ping
// ============================================================================

/// Application-level ping: echoes its body.
pub struct PingHandler;

impl ReturningHandler for PingHandler {
    fn handle(&self, _ctx: &RequestContext, body: &[u8]) -> Option<Vec<u8>> {
        Some(body.to_vec())
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// Identity exchange: replies with this node's id and UDP port.
///
/// Body layout: `port:u16 | nodeId (utf-8)`.
pub struct HandshakeHandler {
    node_id: String,
    udp_port: u16,
}

impl HandshakeHandler {
    /// Handler advertising this node's identity.
    #[must_use]
    pub fn new(node_id: String, udp_port: u16) -> Self {
        Self { node_id, udp_port }
    }
}

impl ReturningHandler for HandshakeHandler {
    fn handle(&self, ctx: &RequestContext, _body: &[u8]) -> Option<Vec<u8>> {
        log::debug!(
            "[handler] handshake from conn={:#x} remote={:?}",
            ctx.connection_id,
            ctx.remote
        );
        let mut body = Vec::with_capacity(2 + self.node_id.len());
        body.extend_from_slice(&self.udp_port.to_be_bytes());
        body.extend_from_slice(self.node_id.as_bytes());
        Some(body)
    }
}

// ============================================================================
// Block / chain queries
// ============================================================================

/// Looks up a value by key in one store table.
///
/// Response: `status:u8 | value` where status 0 carries the value,
/// status 1 means not found. Store errors drop the request (the
/// caller's future times out) and bubble into the log.
pub struct StoreQueryHandler {
    store: Arc<dyn KvStore>,
    table: Table,
}

impl StoreQueryHandler {
    /// Query handler for full blocks.
    #[must_use]
    pub fn blocks(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            table: Table::Block,
        }
    }

    /// Query handler for chain metadata.
    #[must_use]
    pub fn chain(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            table: Table::Chain,
        }
    }
}

impl ReturningHandler for StoreQueryHandler {
    fn handle(&self, _ctx: &RequestContext, body: &[u8]) -> Option<Vec<u8>> {
        match self.store.get(self.table, body) {
            Ok(Some(value)) => {
                let mut out = Vec::with_capacity(1 + value.len());
                out.push(STATUS_OK);
                out.extend_from_slice(&value);
                Some(out)
            }
            Ok(None) => Some(vec![1]),
            Err(err) => {
                log::warn!("[handler] {:?} query failed: {}", self.table, err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MempoolConfig;
    use crate::store::MemoryStore;

    fn ctx() -> RequestContext {
        RequestContext {
            connection_id: 0xAB,
            data_id: 1,
            remote: None,
        }
    }

    #[test]
    fn test_tx_submit_ok_then_duplicate() {
        let mempool = Arc::new(Mempool::new(MempoolConfig::default()));
        let handler = TxSubmitHandler::new(Arc::clone(&mempool));

        let tx = Transaction::new("tx-1", "alice", 9, 1000, 400, vec![1, 2]).unwrap();
        let wire = tx.encode();

        assert_eq!(handler.handle(&ctx(), &wire), Some(vec![STATUS_OK]));
        assert_eq!(mempool.total_count(), 1);
        assert_eq!(
            handler.handle(&ctx(), &wire),
            Some(vec![admit_status(AdmitError::Duplicate)])
        );
    }

    #[test]
    fn test_tx_submit_garbage_is_invalid() {
        let mempool = Arc::new(Mempool::new(MempoolConfig::default()));
        let handler = TxSubmitHandler::new(mempool);
        assert_eq!(
            handler.handle(&ctx(), b"not a transaction"),
            Some(vec![admit_status(AdmitError::Invalid)])
        );
    }

    #[test]
    fn test_ping_echoes() {
        assert_eq!(
            PingHandler.handle(&ctx(), b"hello"),
            Some(b"hello".to_vec())
        );
    }

    #[test]
    fn test_handshake_advertises_identity() {
        let handler = HandshakeHandler::new("node-7".into(), 8333);
        let body = handler.handle(&ctx(), &[]).unwrap();
        assert_eq!(u16::from_be_bytes([body[0], body[1]]), 8333);
        assert_eq!(&body[2..], b"node-7");
    }

    #[test]
    fn test_block_query_hit_and_miss() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(Table::Block, b"h1", b"block-bytes")
            .unwrap();
        let handler = StoreQueryHandler::blocks(store);

        let hit = handler.handle(&ctx(), b"h1").unwrap();
        assert_eq!(hit[0], STATUS_OK);
        assert_eq!(&hit[1..], b"block-bytes");

        assert_eq!(handler.handle(&ctx(), b"h2"), Some(vec![1]));
    }
}
