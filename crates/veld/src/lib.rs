// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! # VELD - prototype blockchain node on a reliable UDP transport
//!
//! A pure Rust prototype of a blockchain node (Solana-inspired) layered
//! over a custom reliable datagram transport. Two subsystems carry the
//! engineering weight: the transport (connection-identified, reliable,
//! ordered-on-reassembly delivery over UDP) and the sharded,
//! priority-ordered transaction mempool.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                        Application                           |
//! |        Node -> handlers (submit, query, handshake)           |
//! +--------------------------------------------------------------+
//! |                     Protocol dispatch                        |
//! |   envelope (tag | flags | requestId) -> handler registry     |
//! +----------------------------+---------------------------------+
//! |    Mempool                 |        Transport (RDT)          |
//! |  32 shards, fee-ordered,   |  Endpoint -> Connection ->      |
//! |  atomic budgets, expiry    |  SendUnit / RecvUnit, frames,   |
//! |  sweep, top-N selector     |  retransmit + gap requests      |
//! +----------------------------+---------------------------------+
//! |          Shared core: timer wheel, ids, murmur3,             |
//! |          completions, TTL maps  |  KV store seam             |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use veld::config::NodeConfig;
//! use veld::node::Node;
//! use veld::store::MemoryStore;
//!
//! fn main() -> std::io::Result<()> {
//!     veld::logging::init_from_env();
//!     let node = Node::start("my-node", NodeConfig::from_env(), Arc::new(MemoryStore::new()))?;
//!     // ... submit transactions, issue requests ...
//!     node.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Key types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`node::Node`] | Top-level runtime value; owns every subsystem |
//! | [`transport::Endpoint`] | One UDP socket plus registry/correlator |
//! | [`transport::Connection`] | Per-peer frame dispatch and heartbeat |
//! | [`mempool::Mempool`] | Sharded fee-ordered pending set |
//! | [`protocol::Dispatcher`] | Tag-coded request/response routing |
//! | [`store::KvStore`] | Persistence seam (consumed, not implemented) |

/// Single source of truth for constants and runtime configuration.
pub mod config;
/// Shared primitives: ids, hashing, timers, completions, bounded maps.
pub mod core;
/// Console logger behind the `log` facade.
pub mod logging;
/// Sharded, priority-ordered transaction mempool.
pub mod mempool;
/// Node runtime wiring.
pub mod node;
/// Peer identity, registry, and k-bucket routing.
pub mod peer;
/// Envelope dispatch and built-in handlers.
pub mod protocol;
/// Key-value persistence interface plus the in-memory store.
pub mod store;
/// Reliable datagram transport over UDP.
pub mod transport;

pub use config::NodeConfig;
pub use mempool::{Mempool, Transaction};
pub use node::Node;
pub use transport::Endpoint;
