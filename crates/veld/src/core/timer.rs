// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Hashed timer wheel with a fixed 10 ms tick.
//!
//! One driver thread advances the wheel; expired tasks are handed to a
//! small worker pool over a crossbeam channel so a slow task cannot
//! stall the tick. Handles support cheap cancellation: cancelled entries
//! are skipped at expiry without touching the wheel slots.
//!
//! Scheduling error is bounded by one tick plus driver jitter, which is
//! well inside the 50 ms retransmit cadence the transport runs on.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::{TIMER_TICK_MS, TIMER_WHEEL_SLOTS, TIMER_WORKERS};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Cancellation handle for a scheduled task.
///
/// Dropping the handle does NOT cancel the task.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Cancel the task if it has not fired yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the task has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct Entry {
    /// Full wheel rotations remaining before this entry is due.
    rounds: u64,
    cancelled: Arc<AtomicBool>,
    task: Option<Task>,
}

struct WheelInner {
    slots: Vec<Mutex<Vec<Entry>>>,
    tick: Duration,
    /// Ticks elapsed since the wheel started.
    current_tick: AtomicU64,
    running: AtomicBool,
    /// Taken (dropped) on shutdown so workers see a disconnect.
    task_tx: Mutex<Option<Sender<Task>>>,
}

/// Shared timer wheel.
///
/// Cloned freely via `Arc`; one instance serves every transport timer in
/// the process (retransmit, global deadline, heartbeat, sweeps).
pub struct TimerWheel {
    inner: Arc<WheelInner>,
    driver: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TimerWheel {
    /// Start a wheel with the default tick, slot count, and worker pool.
    #[must_use]
    pub fn start() -> Arc<Self> {
        Self::with_params(
            Duration::from_millis(TIMER_TICK_MS),
            TIMER_WHEEL_SLOTS,
            TIMER_WORKERS,
        )
    }

    /// Start a wheel with explicit parameters.
    #[must_use]
    pub fn with_params(tick: Duration, slot_count: usize, worker_count: usize) -> Arc<Self> {
        let (task_tx, task_rx) = channel::unbounded::<Task>();

        let inner = Arc::new(WheelInner {
            slots: (0..slot_count).map(|_| Mutex::new(Vec::new())).collect(),
            tick,
            current_tick: AtomicU64::new(0),
            running: AtomicBool::new(true),
            task_tx: Mutex::new(Some(task_tx)),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let rx = task_rx.clone();
            workers.push(
                std::thread::Builder::new()
                    .name(format!("veld-timer-{}", i))
                    .spawn(move || worker_loop(&rx))
                    .expect("spawn timer worker"),
            );
        }
        drop(task_rx);

        let driver_inner = Arc::clone(&inner);
        let driver = std::thread::Builder::new()
            .name("veld-timer-driver".into())
            .spawn(move || driver_loop(&driver_inner))
            .expect("spawn timer driver");

        Arc::new(Self {
            inner,
            driver: Mutex::new(Some(driver)),
            workers: Mutex::new(workers),
        })
    }

    /// Schedule `task` to run after `delay` (rounded up to the next tick).
    pub fn schedule<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = TimerHandle {
            cancelled: Arc::clone(&cancelled),
        };

        if !self.inner.running.load(Ordering::Acquire) {
            // Wheel already shut down: mark the handle dead, drop the task.
            cancelled.store(true, Ordering::Release);
            return handle;
        }

        let tick_ms = self.inner.tick.as_millis().max(1) as u64;
        // +1 tick margin: the driver may already be draining the slot
        // for the tick we just read.
        let ticks = (delay.as_millis() as u64).div_ceil(tick_ms).max(1) + 1;
        let target = self.inner.current_tick.load(Ordering::Acquire) + ticks;
        let slot_count = self.inner.slots.len() as u64;
        let slot = (target % slot_count) as usize;
        // Rotations the driver passes this slot before the entry is due.
        let rounds = (ticks - 1) / slot_count;

        self.inner.slots[slot].lock().push(Entry {
            rounds,
            cancelled,
            task: Some(Box::new(task)),
        });

        handle
    }

    /// Stop the driver and workers. Pending tasks are discarded;
    /// in-flight tasks finish.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(driver) = self.driver.lock().take() {
            let _ = driver.join();
        }
        // Dropping every queued entry releases captured state.
        for slot in &self.inner.slots {
            slot.lock().clear();
        }
        // Drop the sender so workers see a disconnect and exit.
        drop(self.inner.task_tx.lock().take());
        for w in self.workers.lock().drain(..) {
            let _ = w.join();
        }
    }
}

impl Drop for TimerWheel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn driver_loop(inner: &Arc<WheelInner>) {
    let start = Instant::now();
    let slot_count = inner.slots.len() as u64;
    let Some(task_tx) = inner.task_tx.lock().clone() else {
        return;
    };

    while inner.running.load(Ordering::Acquire) {
        let tick = inner.current_tick.load(Ordering::Acquire) + 1;
        let next_deadline = start + inner.tick * (tick as u32);
        let now = Instant::now();
        if next_deadline > now {
            std::thread::sleep(next_deadline - now);
        }

        inner.current_tick.store(tick, Ordering::Release);
        let slot = (tick % slot_count) as usize;

        let mut due = Vec::new();
        {
            let mut entries = inner.slots[slot].lock();
            entries.retain_mut(|entry| {
                if entry.cancelled.load(Ordering::Acquire) {
                    return false;
                }
                if entry.rounds > 0 {
                    entry.rounds -= 1;
                    return true;
                }
                if let Some(task) = entry.task.take() {
                    due.push(task);
                }
                false
            });
        }

        for task in due {
            if task_tx.send(task).is_err() {
                return;
            }
        }
    }
}

fn worker_loop(rx: &Receiver<Task>) {
    while let Ok(task) = rx.recv() {
        // A panicking timer task must not take the worker down with it.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
        if result.is_err() {
            log::warn!("[timer] task panicked; worker continues");
        }
    }
}
