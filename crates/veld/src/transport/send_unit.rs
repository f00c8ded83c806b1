// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Sender-side per-payload state machine.
//!
//! A [`SendUnit`] owns one payload's DATA frames and drives them to the
//! peer: batch dispatch, per-frame retransmit timers (50 ms cadence,
//! budget 6), one absolute deadline for the whole unit, and a single
//! completion the caller waits on.
//!
//! State transitions are first-wins: whichever of all-acked, retry
//! exhaustion, or the global deadline happens first settles the unit,
//! cancels every outstanding timer, and removes it from its connection.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::frame::{AckBody, Frame};
use super::{FrameTx, TransportMetrics};
use crate::config::RdtConfig;
use crate::core::timer::TimerHandle;
use crate::core::{Completion, TimerWheel};

/// Why a send failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Zero-length payloads are rejected up front.
    EmptyPayload,
    /// Payload would exceed the per-payload frame ceiling.
    PayloadTooLarge,
    /// The unit's absolute deadline expired.
    Timeout,
    /// A frame exhausted its retransmit budget (carries the sequence).
    RetryExhausted(i32),
    /// The owning connection closed while the unit was in flight.
    ConnectionClosed,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::EmptyPayload => write!(f, "empty payload"),
            SendError::PayloadTooLarge => write!(f, "payload exceeds frame ceiling"),
            SendError::Timeout => write!(f, "send deadline expired"),
            SendError::RetryExhausted(seq) => {
                write!(f, "retransmit budget exhausted for sequence {}", seq)
            }
            SendError::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for SendError {}

/// Outcome delivered through the unit's completion.
pub type SendResult = Result<(), SendError>;

struct SendState {
    acked: Vec<bool>,
    acked_count: usize,
    retries: Vec<u32>,
    frame_timers: Vec<Option<TimerHandle>>,
    terminal: bool,
}

/// One in-flight outbound payload.
pub struct SendUnit {
    connection_id: u64,
    data_id: u64,
    total: i32,
    frames: Vec<Frame>,
    state: Mutex<SendState>,
    global_timer: Mutex<Option<TimerHandle>>,
    removal: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    completion: Arc<Completion<SendResult>>,
    tx: Arc<dyn FrameTx>,
    wheel: Arc<TimerWheel>,
    metrics: Arc<TransportMetrics>,
    retransmit_interval: Duration,
    max_retries: u32,
    global_timeout: Duration,
    batch_size: usize,
}

impl SendUnit {
    /// Fragment `payload` and build the unit. Rejects empty payloads.
    ///
    /// The unit is inert until [`SendUnit::start`]; callers register it
    /// on the connection between the two.
    pub fn new(
        connection_id: u64,
        data_id: u64,
        payload: &[u8],
        cfg: &RdtConfig,
        tx: Arc<dyn FrameTx>,
        wheel: Arc<TimerWheel>,
        metrics: Arc<TransportMetrics>,
    ) -> Result<Arc<Self>, SendError> {
        if payload.is_empty() {
            return Err(SendError::EmptyPayload);
        }
        let frame_count = payload.len().div_ceil(cfg.max_frame_payload);
        if frame_count > crate::config::MAX_FRAMES_PER_PAYLOAD as usize {
            return Err(SendError::PayloadTooLarge);
        }

        let total = frame_count as i32;
        let mut frames = Vec::with_capacity(total as usize);
        for (seq, chunk) in payload.chunks(cfg.max_frame_payload).enumerate() {
            frames.push(Frame::data(
                connection_id,
                data_id,
                total,
                seq as i32,
                chunk.to_vec(),
            ));
        }

        Ok(Arc::new(Self {
            connection_id,
            data_id,
            total,
            frames,
            state: Mutex::new(SendState {
                acked: vec![false; total as usize],
                acked_count: 0,
                retries: vec![0; total as usize],
                frame_timers: (0..total).map(|_| None).collect(),
                terminal: false,
            }),
            global_timer: Mutex::new(None),
            removal: Mutex::new(None),
            completion: Completion::new(),
            tx,
            wheel,
            metrics,
            retransmit_interval: Duration::from_millis(cfg.retransmit_interval_ms),
            max_retries: cfg.max_retransmit_times,
            global_timeout: Duration::from_millis(cfg.global_timeout_ms),
            batch_size: cfg.batch_size,
        }))
    }

    /// Payload id this unit carries.
    #[must_use]
    pub fn data_id(&self) -> u64 {
        self.data_id
    }

    /// Frame count.
    #[must_use]
    pub fn total(&self) -> i32 {
        self.total
    }

    /// The caller-facing completion.
    #[must_use]
    pub fn completion(&self) -> Arc<Completion<SendResult>> {
        Arc::clone(&self.completion)
    }

    /// Install the hook that unlinks this unit from its connection on
    /// any terminal transition.
    pub fn set_removal_hook<F: FnOnce() + Send + 'static>(&self, hook: F) {
        *self.removal.lock() = Some(Box::new(hook));
    }

    /// Dispatch all frames (in batches) and arm every timer.
    pub fn start(self: &Arc<Self>) {
        // Deadline first: a unit must never outlive its budget, even if
        // initial dispatch stalls on a slow socket.
        let weak = Arc::downgrade(self);
        *self.global_timer.lock() = Some(self.wheel.schedule(self.global_timeout, move || {
            if let Some(unit) = weak.upgrade() {
                unit.finish(Err(SendError::Timeout));
            }
        }));

        for batch in self.frames.chunks(self.batch_size) {
            for frame in batch {
                if let Err(err) = self.tx.transmit(frame) {
                    log::debug!(
                        "[send] initial transmit failed conn={:#x} data={} seq={}: {}",
                        self.connection_id,
                        self.data_id,
                        frame.sequence,
                        err
                    );
                }
                self.arm_frame_timer(frame.sequence);
            }
        }
    }

    /// Apply an ACK (idempotent, commutative). Returns true when the
    /// unit just completed successfully.
    pub fn on_ack(&self, body: &AckBody) -> bool {
        if !body.received {
            return false;
        }
        self.metrics.incr_acks_received();

        let mut done = self.apply_ack_seq(body.sequence);
        for seq in &body.batch {
            done |= self.apply_ack_seq(*seq);
        }
        done
    }

    /// Remote-driven resend; does not consume the retry budget.
    pub fn on_immediate_request(&self, sequence: i32) {
        if sequence < 0 || sequence >= self.total {
            return;
        }
        {
            let state = self.state.lock();
            if state.terminal || state.acked[sequence as usize] {
                return;
            }
        }
        self.metrics.incr_retransmits();
        if let Err(err) = self.tx.transmit(&self.frames[sequence as usize]) {
            log::debug!(
                "[send] immediate resend failed data={} seq={}: {}",
                self.data_id,
                sequence,
                err
            );
        }
    }

    /// Force-fail the unit (connection close, registry eviction).
    pub fn fail(&self, err: SendError) {
        self.finish(Err(err));
    }

    /// Whether the unit has settled.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.lock().terminal
    }

    fn apply_ack_seq(&self, sequence: i32) -> bool {
        if sequence < 0 || sequence >= self.total {
            return false;
        }
        let complete = {
            let mut state = self.state.lock();
            if state.terminal || state.acked[sequence as usize] {
                return false;
            }
            state.acked[sequence as usize] = true;
            state.acked_count += 1;
            if let Some(timer) = state.frame_timers[sequence as usize].take() {
                timer.cancel();
            }
            state.acked_count == self.total as usize
        };

        if complete {
            self.finish(Ok(()));
            return true;
        }
        false
    }

    fn arm_frame_timer(self: &Arc<Self>, sequence: i32) {
        let weak = Arc::downgrade(self);
        let handle = self.wheel.schedule(self.retransmit_interval, move || {
            if let Some(unit) = weak.upgrade() {
                unit.on_retransmit_timer(sequence);
            }
        });

        let mut state = self.state.lock();
        if state.terminal || state.acked[sequence as usize] {
            handle.cancel();
            return;
        }
        state.frame_timers[sequence as usize] = Some(handle);
    }

    fn on_retransmit_timer(self: &Arc<Self>, sequence: i32) {
        let exhausted = {
            let mut state = self.state.lock();
            if state.terminal || state.acked[sequence as usize] {
                return;
            }
            if state.retries[sequence as usize] >= self.max_retries {
                true
            } else {
                state.retries[sequence as usize] += 1;
                false
            }
        };

        if exhausted {
            self.finish(Err(SendError::RetryExhausted(sequence)));
            return;
        }

        self.metrics.incr_retransmits();
        if let Err(err) = self.tx.transmit(&self.frames[sequence as usize]) {
            log::debug!(
                "[send] retransmit failed data={} seq={}: {}",
                self.data_id,
                sequence,
                err
            );
        }
        self.arm_frame_timer(sequence);
    }

    /// Settle the unit. First transition wins; later calls are no-ops.
    fn finish(&self, result: SendResult) {
        {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            state.terminal = true;
            for timer in state.frame_timers.iter_mut() {
                if let Some(t) = timer.take() {
                    t.cancel();
                }
            }
        }
        if let Some(timer) = self.global_timer.lock().take() {
            timer.cancel();
        }

        match &result {
            Ok(()) => log::debug!(
                "[send] complete conn={:#x} data={} total={}",
                self.connection_id,
                self.data_id,
                self.total
            ),
            Err(err) => log::debug!(
                "[send] failed conn={:#x} data={}: {}",
                self.connection_id,
                self.data_id,
                err
            ),
        }

        self.completion.complete(result);
        if let Some(hook) = self.removal.lock().take() {
            hook();
        }
    }
}
