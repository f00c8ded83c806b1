// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Console logger behind the `log` facade.
//!
//! The library only ever emits through `log::...!` macros; binaries
//! call [`init`] (or [`init_from_env`], reading `VELD_LOG`) once at
//! startup. Output goes to stderr with a monotonic millisecond stamp so
//! interleaved transport traces stay readable.

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::io::Write;
use std::time::Instant;

struct ConsoleLogger {
    start: Instant,
    level: LevelFilter,
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let ms = self.start.elapsed().as_millis();
        let level = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{:>8}ms {} {}", ms, level, record.args());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install the console logger at `level`. Safe to call more than once
/// (later calls are no-ops - the facade accepts one logger per
/// process).
pub fn init(level: LevelFilter) {
    let logger = ConsoleLogger {
        start: Instant::now(),
        level,
    };
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(level);
    }
}

/// Install the console logger at the level named by `VELD_LOG`
/// (error|warn|info|debug|trace); defaults to info.
pub fn init_from_env() {
    let level = std::env::var("VELD_LOG")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(LevelFilter::Info);
    init(level);
}
