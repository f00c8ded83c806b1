// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! One-shot completion handles.
//!
//! A [`Completion`] is the caller-facing half of an asynchronous
//! operation: the transport fulfills it from a reader or timer thread,
//! the caller blocks on [`Completion::wait_timeout`] (or polls with
//! [`Completion::try_get`]). Fulfillment is idempotent - the first value
//! wins, later ones are dropped.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One-shot, thread-safe completion cell.
#[derive(Debug)]
pub struct Completion<T> {
    slot: Mutex<Option<T>>,
    cond: Condvar,
}

impl<T: Clone> Completion<T> {
    /// Create an empty, shareable completion.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(None),
            cond: Condvar::new(),
        })
    }

    /// Fulfill the completion. Returns false if it was already fulfilled.
    pub fn complete(&self, value: T) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        self.cond.notify_all();
        true
    }

    /// Non-blocking read of the fulfilled value, if any.
    #[must_use]
    pub fn try_get(&self) -> Option<T> {
        self.slot.lock().clone()
    }

    /// True once a value has been set.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Block until fulfilled or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while slot.is_none() {
            if self.cond.wait_until(&mut slot, deadline).timed_out() {
                return slot.clone();
            }
        }
        slot.clone()
    }
}
