// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Global configuration - single source of truth.
//!
//! This module centralizes ALL transport and mempool constants plus the
//! runtime configuration. **Never hardcode these elsewhere!**
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: compile-time constants (wire sizes, budgets,
//!   retransmit cadence)
//! - **Level 2 (Dynamic)**: [`NodeConfig`] built from defaults, environment
//!   variables, and `key=value` option files; [`RuntimeConfig`] for values
//!   that may be swapped while the node runs

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

// =======================================================================
// Frame wire format
// =======================================================================

/// Fixed frame header size in bytes (see `transport::frame` for layout).
///
/// `connectionId(8) | dataId(8) | total(4) | frameType(1) | sequence(4) |
/// frameTotalLength(4)` - big-endian throughout.
pub const FRAME_HEADER_LEN: usize = 29;

/// Maximum payload bytes carried by a single DATA frame.
///
/// Keeps `header + payload` (≤ 1053 bytes) inside a single MTU on
/// everything but exotic links. One frame per UDP datagram.
pub const MAX_FRAME_PAYLOAD: usize = 1024;

/// Maximum on-wire frame size: header plus payload.
pub const MAX_FRAME_LEN: usize = FRAME_HEADER_LEN + MAX_FRAME_PAYLOAD;

// =======================================================================
// Reliability budgets
// =======================================================================

/// Frames dispatched per outbound batch when a payload fragments into
/// many DATA frames.
pub const PUBLIC_BATCH_SIZE: usize = 1000;

/// Per-frame retransmit timer delay (milliseconds).
pub const RETRANSMIT_INTERVAL_MS: u64 = 50;

/// Per-frame retransmit budget. Also caps receiver-side retransmit
/// requests and per-sequence ACK emissions.
pub const MAX_RETRANSMIT_TIMES: u32 = 6;

/// Aggregate deadline for a whole send/receive unit (milliseconds).
///
/// A unit that has not completed by its deadline fails as a whole,
/// irrespective of per-frame retry progress.
pub const GLOBAL_TIMEOUT_MS: u64 = 300;

/// Heartbeat PING cadence once a connection is established (milliseconds).
pub const HEARTBEAT_INTERVAL_MS: u64 = 400;

/// How long to wait for a PONG before marking the peer unreachable
/// (milliseconds).
pub const PING_TIMEOUT_MS: u64 = 5_000;

/// Idle-access TTL for entries in the connection registry (milliseconds).
pub const CONNECTION_IDLE_TIMEOUT_MS: u64 = 60_000;

/// Hard cap on simultaneously tracked connections.
pub const MAX_CONNECTIONS: usize = 10_000;

/// Budget for a registry eviction hook to close a connection
/// gracefully (milliseconds). On overrun the close is forced.
pub const CONNECTION_CLOSE_BUDGET_MS: u64 = 5_000;

/// Ceiling on frames per payload (1 GiB of payload at 1024 B/frame).
/// Senders refuse larger payloads; receivers drop DATA frames claiming
/// a larger total instead of sizing an allocation from the wire.
pub const MAX_FRAMES_PER_PAYLOAD: i32 = 1_048_576;

// =======================================================================
// Response correlator
// =======================================================================

/// TTL for request-id -> completion entries (milliseconds).
pub const CORRELATOR_TTL_MS: u64 = 30_000;

/// Capacity bound for the correlator map.
pub const CORRELATOR_CAPACITY: usize = 1_000_000;

/// Capacity of the delivered-payload dedup cache (per endpoint).
pub const DELIVERED_DEDUP_CAPACITY: usize = 65_536;

/// TTL for delivered-payload dedup entries (milliseconds). Long enough
/// to outlive any sender's retransmit tail.
pub const DELIVERED_DEDUP_TTL_MS: u64 = 30_000;

// =======================================================================
// Timer wheel
// =======================================================================

/// Wheel tick granularity (milliseconds). All transport timers round up
/// to the next tick.
pub const TIMER_TICK_MS: u64 = 10;

/// Wheel slot count. `slots * tick` is one full rotation (5.12 s);
/// longer delays ride the wheel for multiple rounds.
pub const TIMER_WHEEL_SLOTS: usize = 512;

/// Worker threads executing expired timer tasks.
pub const TIMER_WORKERS: usize = 2;

// =======================================================================
// Mempool budgets
// =======================================================================

/// Global transaction-count capacity.
pub const MEMPOOL_MAX_CAPACITY: usize = 1_048_576;

/// Global byte budget (1 GiB).
pub const MEMPOOL_MAX_BYTES: usize = 1 << 30;

/// Shard count. Must be a power of two.
pub const MEMPOOL_SHARD_COUNT: usize = 32;

/// Default bound for `select_and_remove_top`.
pub const MEMPOOL_SELECTION_SIZE: usize = 4_096;

/// Default transaction expiry (milliseconds after submit).
pub const TX_EXPIRE_MS: u64 = 400;

/// Expiry sweep cadence (milliseconds).
pub const MEMPOOL_SWEEP_INTERVAL_MS: u64 = 400;

/// Connection-registry idle prune cadence (milliseconds).
pub const REGISTRY_PRUNE_INTERVAL_MS: u64 = 1_000;

/// Correlator TTL prune cadence (milliseconds).
pub const CORRELATOR_PRUNE_INTERVAL_MS: u64 = 1_000;

// =======================================================================
// Networking defaults
// =======================================================================

/// Default UDP port for peer traffic.
pub const DEFAULT_UDP_PORT: u16 = 8333;

/// Default store cache budget in MB (`system.maxSize`).
pub const DEFAULT_STORE_CACHE_MB: usize = 64;

// =======================================================================
// NodeConfig
// =======================================================================

/// Mempool tuning knobs, defaulting to the constants above.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Global transaction-count capacity.
    pub max_capacity: usize,
    /// Global byte budget.
    pub max_bytes: usize,
    /// Shard count (power of two).
    pub shard_count: usize,
    /// Default bound for top-N selection.
    pub selection_size: usize,
    /// Transaction expiry in milliseconds.
    pub tx_expire_ms: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_capacity: MEMPOOL_MAX_CAPACITY,
            max_bytes: MEMPOOL_MAX_BYTES,
            shard_count: MEMPOOL_SHARD_COUNT,
            selection_size: MEMPOOL_SELECTION_SIZE,
            tx_expire_ms: TX_EXPIRE_MS,
        }
    }
}

impl MempoolConfig {
    /// Per-shard transaction-count cap.
    #[must_use]
    pub fn shard_capacity(&self) -> usize {
        self.max_capacity / self.shard_count
    }

    /// Per-shard byte cap.
    #[must_use]
    pub fn shard_bytes(&self) -> usize {
        self.max_bytes / self.shard_count
    }
}

/// Reliable-transport tuning knobs, defaulting to the constants above.
#[derive(Debug, Clone)]
pub struct RdtConfig {
    /// Maximum payload bytes per DATA frame.
    pub max_frame_payload: usize,
    /// Frames dispatched per outbound batch.
    pub batch_size: usize,
    /// Per-frame retransmit delay (ms).
    pub retransmit_interval_ms: u64,
    /// Per-frame retransmit budget.
    pub max_retransmit_times: u32,
    /// Aggregate unit deadline (ms).
    pub global_timeout_ms: u64,
    /// Connection idle TTL (ms).
    pub connection_idle_timeout_ms: u64,
    /// Heartbeat cadence (ms).
    pub heartbeat_interval_ms: u64,
}

impl Default for RdtConfig {
    fn default() -> Self {
        Self {
            max_frame_payload: MAX_FRAME_PAYLOAD,
            batch_size: PUBLIC_BATCH_SIZE,
            retransmit_interval_ms: RETRANSMIT_INTERVAL_MS,
            max_retransmit_times: MAX_RETRANSMIT_TIMES,
            global_timeout_ms: GLOBAL_TIMEOUT_MS,
            connection_idle_timeout_ms: CONNECTION_IDLE_TIMEOUT_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
        }
    }
}

/// Top-level node configuration.
///
/// Built from [`Default`], then layered with [`NodeConfig::apply_option`]
/// (recognized `key=value` pairs) and [`NodeConfig::from_env`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Data directory (`system.path`).
    pub data_dir: PathBuf,
    /// Store cache budget in MB (`system.maxSize`).
    pub store_cache_mb: usize,
    /// UDP port for peer traffic (`port`).
    pub udp_port: u16,
    /// Whether the NAT discovery helper would run (`isStun`).
    ///
    /// The helper itself is an external collaborator; the node only
    /// records the setting.
    pub is_stun: bool,
    /// Port for the NAT discovery helper (`stunPort`).
    pub stun_port: u16,
    /// Mempool knobs.
    pub mempool: MempoolConfig,
    /// Transport knobs.
    pub rdt: RdtConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            store_cache_mb: DEFAULT_STORE_CACHE_MB,
            udp_port: DEFAULT_UDP_PORT,
            is_stun: false,
            stun_port: 3478,
            mempool: MempoolConfig::default(),
            rdt: RdtConfig::default(),
        }
    }
}

/// Error applying a configuration option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Option key is not recognized.
    UnknownOption(String),
    /// Option value failed to parse.
    InvalidValue { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownOption(key) => write!(f, "unknown option: {}", key),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value for {}: {}", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl NodeConfig {
    /// Apply a single recognized `key=value` option.
    ///
    /// Recognized keys: `system.path`, `system.maxSize`, `isStun`,
    /// `stunPort`, `port`, `MAX_CAPACITY`, `MAX_BYTES`, `SELECTION_SIZE`,
    /// `SHARD_COUNT`, `TX_EXPIRE_MS`.
    pub fn apply_option(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
            value.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            })
        }

        match key {
            "system.path" => self.data_dir = PathBuf::from(value),
            "system.maxSize" => self.store_cache_mb = parse(key, value)?,
            "isStun" => self.is_stun = parse(key, value)?,
            "stunPort" => self.stun_port = parse(key, value)?,
            "port" => self.udp_port = parse(key, value)?,
            "MAX_CAPACITY" => self.mempool.max_capacity = parse(key, value)?,
            "MAX_BYTES" => self.mempool.max_bytes = parse(key, value)?,
            "SELECTION_SIZE" => self.mempool.selection_size = parse(key, value)?,
            "SHARD_COUNT" => {
                let n: usize = parse(key, value)?;
                if !n.is_power_of_two() {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    });
                }
                self.mempool.shard_count = n;
            }
            "TX_EXPIRE_MS" => self.mempool.tx_expire_ms = parse(key, value)?,
            _ => return Err(ConfigError::UnknownOption(key.to_string())),
        }
        Ok(())
    }

    /// Layer environment overrides onto `self`.
    ///
    /// `VELD_PORT`, `VELD_DATA_DIR`, `VELD_STORE_CACHE_MB` are read;
    /// malformed values are logged and ignored.
    pub fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("VELD_PORT") {
            match port.parse() {
                Ok(p) => self.udp_port = p,
                Err(_) => log::warn!("[config] ignoring malformed VELD_PORT={}", port),
            }
        }
        if let Ok(dir) = std::env::var("VELD_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(mb) = std::env::var("VELD_STORE_CACHE_MB") {
            match mb.parse() {
                Ok(m) => self.store_cache_mb = m,
                Err(_) => log::warn!("[config] ignoring malformed VELD_STORE_CACHE_MB={}", mb),
            }
        }
    }

    /// Defaults plus environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }
}

// =======================================================================
// RuntimeConfig
// =======================================================================

/// Runtime-mutable configuration store.
///
/// String-keyed options live in a `DashMap` (lock-free reads); the node
/// config snapshot is swapped atomically so readers never block writers.
pub struct RuntimeConfig {
    node: ArcSwap<NodeConfig>,
    options: DashMap<Arc<str>, Arc<str>>,
}

impl RuntimeConfig {
    /// Wrap an initial node configuration.
    #[must_use]
    pub fn new(node: NodeConfig) -> Self {
        Self {
            node: ArcSwap::from_pointee(node),
            options: DashMap::new(),
        }
    }

    /// Current node configuration snapshot.
    #[must_use]
    pub fn node(&self) -> Arc<NodeConfig> {
        self.node.load_full()
    }

    /// Replace the node configuration snapshot.
    pub fn swap_node(&self, node: NodeConfig) {
        self.node.store(Arc::new(node));
    }

    /// Set a free-form string option.
    pub fn set_option(&self, key: &str, value: &str) {
        self.options.insert(Arc::from(key), Arc::from(value));
    }

    /// Read a free-form string option.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<Arc<str>> {
        self.options.get(key).map(|v| v.value().clone())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new(NodeConfig::default())
    }
}
