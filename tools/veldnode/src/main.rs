// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Standalone node runner.
//!
//! ```text
//! veldnode [--config <file>] [--name <name>]
//! ```
//!
//! The config file holds one `key=value` per line using the recognized
//! option names (`system.path`, `system.maxSize`, `port`, `isStun`,
//! `stunPort`, `MAX_CAPACITY`, ...). Environment overrides (`VELD_PORT`,
//! `VELD_DATA_DIR`, `VELD_LOG`) apply on top.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use veld::config::NodeConfig;
use veld::node::Node;
use veld::store::MemoryStore;

fn usage() {
    eprintln!("usage: veldnode [--config <file>] [--name <name>]");
}

fn load_config(path: &str, cfg: &mut NodeConfig) -> Result<(), String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("read {}: {}", path, e))?;
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(format!("{}:{}: expected key=value", path, lineno + 1));
        };
        cfg.apply_option(key.trim(), value.trim())
            .map_err(|e| format!("{}:{}: {}", path, lineno + 1, e))?;
    }
    Ok(())
}

fn main() -> ExitCode {
    veld::logging::init_from_env();

    let mut cfg = NodeConfig::default();
    let mut name = String::from("veld-node");

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let Some(path) = args.next() else {
                    usage();
                    return ExitCode::FAILURE;
                };
                if let Err(err) = load_config(&path, &mut cfg) {
                    log::error!("[veldnode] {}", err);
                    return ExitCode::FAILURE;
                }
            }
            "--name" => {
                let Some(value) = args.next() else {
                    usage();
                    return ExitCode::FAILURE;
                };
                name = value;
            }
            "--help" | "-h" => {
                usage();
                return ExitCode::SUCCESS;
            }
            other => {
                log::error!("[veldnode] unknown argument: {}", other);
                usage();
                return ExitCode::FAILURE;
            }
        }
    }
    cfg.apply_env();

    if cfg.is_stun {
        log::info!(
            "[veldnode] NAT discovery requested on port {} (external helper)",
            cfg.stun_port
        );
    }

    let node = match Node::start(&name, cfg, Arc::new(MemoryStore::new())) {
        Ok(node) => node,
        Err(err) => {
            log::error!("[veldnode] startup failed: {}", err);
            return ExitCode::FAILURE;
        }
    };

    log::info!(
        "[veldnode] running as {} on {} - Ctrl-C to stop",
        node.name(),
        node.endpoint().local_addr()
    );

    // Simple run loop; the interesting threads live inside the node.
    loop {
        std::thread::sleep(Duration::from_secs(5));
        let metrics = node.endpoint().metrics();
        log::debug!(
            "[veldnode] conns={} mempool={}tx/{}B frames tx/rx={}/{}",
            node.endpoint().registry().len(),
            node.mempool().total_count(),
            node.mempool().total_bytes(),
            metrics.frames_sent,
            metrics.frames_received
        );
    }
}
