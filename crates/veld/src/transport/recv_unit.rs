// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Receiver-side per-payload reassembler.
//!
//! A [`RecvUnit`] is created on the first DATA frame of an unseen
//! `dataId` and owns that payload's arrival state: slot storage by
//! sequence, duplicate suppression, receiver-driven gap requests
//! (IMMEDIATE_REQUEST on the retransmit cadence, same budget as the
//! sender), capped ACK emission, and one absolute deadline scaled by the
//! frame count.
//!
//! Reassembly is exact: payload bytes are concatenated in sequence
//! order and delivered upward at most once.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::frame::{AckBody, Frame, FrameType, ImmediateRequestBody};
use super::{FrameTx, TransportMetrics};
use crate::config::RdtConfig;
use crate::core::timer::TimerHandle;
use crate::core::TimerWheel;

/// Why a reassembly was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvFailure {
    /// A missing sequence exhausted its request budget.
    NackExhausted(i32),
    /// The unit's absolute deadline expired.
    Timeout,
}

impl fmt::Display for RecvFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecvFailure::NackExhausted(seq) => {
                write!(f, "request budget exhausted for sequence {}", seq)
            }
            RecvFailure::Timeout => write!(f, "reassembly deadline expired"),
        }
    }
}

/// ACK batch confirmations are attached every this many received frames.
const ACK_BATCH_STRIDE: usize = 64;

/// Upper bound on sequences listed in one batch confirmation.
const ACK_BATCH_LIMIT: usize = 128;

struct RecvState {
    slots: Vec<Option<Vec<u8>>>,
    received_count: usize,
    request_counts: Vec<u32>,
    ack_counts: Vec<u32>,
    request_timers: Vec<Option<TimerHandle>>,
    terminal: bool,
}

/// One in-flight inbound payload.
pub struct RecvUnit {
    connection_id: u64,
    data_id: u64,
    total: i32,
    state: Mutex<RecvState>,
    global_timer: Mutex<Option<TimerHandle>>,
    removal: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    tx: Arc<dyn FrameTx>,
    wheel: Arc<TimerWheel>,
    metrics: Arc<TransportMetrics>,
    request_interval: Duration,
    max_requests: u32,
    global_timeout: Duration,
}

impl RecvUnit {
    /// Build a unit sized from the first frame's `total`.
    ///
    /// `connection_id` is the LOCAL derivation - it stamps the outbound
    /// ACK and request frames.
    #[must_use]
    pub fn new(
        connection_id: u64,
        data_id: u64,
        total: i32,
        cfg: &RdtConfig,
        tx: Arc<dyn FrameTx>,
        wheel: Arc<TimerWheel>,
        metrics: Arc<TransportMetrics>,
    ) -> Arc<Self> {
        // Large payloads get proportionally more deadline: one base
        // budget per dispatched batch.
        let batches = 1 + (total as u64) / (cfg.batch_size as u64);
        let global_timeout = Duration::from_millis(cfg.global_timeout_ms * batches);

        Arc::new(Self {
            connection_id,
            data_id,
            total,
            state: Mutex::new(RecvState {
                slots: (0..total).map(|_| None).collect(),
                received_count: 0,
                request_counts: vec![0; total as usize],
                ack_counts: vec![0; total as usize],
                request_timers: (0..total).map(|_| None).collect(),
                terminal: false,
            }),
            global_timer: Mutex::new(None),
            removal: Mutex::new(None),
            tx,
            wheel,
            metrics,
            request_interval: Duration::from_millis(cfg.retransmit_interval_ms),
            max_requests: cfg.max_retransmit_times,
            global_timeout,
        })
    }

    /// Payload id being reassembled.
    #[must_use]
    pub fn data_id(&self) -> u64 {
        self.data_id
    }

    /// Expected frame count.
    #[must_use]
    pub fn total(&self) -> i32 {
        self.total
    }

    /// Install the hook that unlinks this unit from its connection when
    /// it settles without delivering (timeout, exhaustion, close).
    pub fn set_removal_hook<F: FnOnce() + Send + 'static>(&self, hook: F) {
        *self.removal.lock() = Some(Box::new(hook));
    }

    /// Arm the global deadline. Called once, right after registration.
    pub fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        *self.global_timer.lock() = Some(self.wheel.schedule(self.global_timeout, move || {
            if let Some(unit) = weak.upgrade() {
                unit.abandon(RecvFailure::Timeout);
            }
        }));
    }

    /// Ingest one DATA frame.
    ///
    /// Returns the fully reassembled payload exactly once, on the frame
    /// that completes it. Duplicates and out-of-range frames are
    /// acknowledged (capped) and dropped.
    pub fn on_data(self: &Arc<Self>, frame: &Frame) -> Option<Vec<u8>> {
        let seq = frame.sequence;

        // Out of range for this dataId: ack to suppress a sender that is
        // retransmitting something we can never place, then drop.
        if frame.total != self.total || seq < 0 || seq >= self.total {
            log::debug!(
                "[recv] out-of-range frame data={} seq={} total={} (expected total {})",
                self.data_id,
                seq,
                frame.total,
                self.total
            );
            self.send_ack_uncapped(seq);
            return None;
        }

        let (duplicate, complete) = {
            let mut state = self.state.lock();
            if state.terminal {
                return None;
            }

            if state.slots[seq as usize].is_some() {
                if let Some(timer) = state.request_timers[seq as usize].take() {
                    timer.cancel();
                }
                (true, false)
            } else {
                state.slots[seq as usize] = Some(frame.payload.clone());
                state.received_count += 1;
                if let Some(timer) = state.request_timers[seq as usize].take() {
                    timer.cancel();
                }
                (false, state.received_count == self.total as usize)
            }
        };

        self.send_ack(seq);

        if duplicate {
            return None;
        }

        if complete {
            return self.assemble();
        }

        self.arm_missing_requests();
        None
    }

    /// Force-settle without delivery (connection close).
    pub fn cancel(&self) {
        self.settle();
    }

    /// Whether the unit has settled.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.lock().terminal
    }

    /// Concatenate slots in sequence order and settle. Only called when
    /// every slot is filled.
    fn assemble(self: &Arc<Self>) -> Option<Vec<u8>> {
        let payload = {
            let mut state = self.state.lock();
            if state.terminal {
                return None;
            }
            state.terminal = true;
            for timer in state.request_timers.iter_mut() {
                if let Some(t) = timer.take() {
                    t.cancel();
                }
            }

            let mut payload =
                Vec::with_capacity(state.slots.iter().map(|s| s.as_ref().map_or(0, Vec::len)).sum());
            for slot in state.slots.iter_mut() {
                // Every slot is Some here; take() releases the buffers.
                if let Some(bytes) = slot.take() {
                    payload.extend_from_slice(&bytes);
                }
            }
            payload
        };

        if let Some(timer) = self.global_timer.lock().take() {
            timer.cancel();
        }
        if let Some(hook) = self.removal.lock().take() {
            hook();
        }

        self.metrics.incr_delivered();
        log::debug!(
            "[recv] reassembled conn={:#x} data={} total={} bytes={}",
            self.connection_id,
            self.data_id,
            self.total,
            payload.len()
        );
        Some(payload)
    }

    /// Schedule request timers for every currently missing sequence that
    /// does not already have one pending.
    fn arm_missing_requests(self: &Arc<Self>) {
        let missing: Vec<i32> = {
            let state = self.state.lock();
            if state.terminal {
                return;
            }
            (0..self.total)
                .filter(|&s| {
                    state.slots[s as usize].is_none() && state.request_timers[s as usize].is_none()
                })
                .collect()
        };

        for seq in missing {
            self.arm_request_timer(seq);
        }
    }

    fn arm_request_timer(self: &Arc<Self>, seq: i32) {
        let weak = Arc::downgrade(self);
        let handle = self.wheel.schedule(self.request_interval, move || {
            if let Some(unit) = weak.upgrade() {
                unit.on_request_timer(seq);
            }
        });

        let mut state = self.state.lock();
        if state.terminal || state.slots[seq as usize].is_some() {
            handle.cancel();
            return;
        }
        state.request_timers[seq as usize] = Some(handle);
    }

    fn on_request_timer(self: &Arc<Self>, seq: i32) {
        let request_count = {
            let mut state = self.state.lock();
            if state.terminal || state.slots[seq as usize].is_some() {
                return;
            }
            if state.request_counts[seq as usize] >= self.max_requests {
                drop(state);
                self.abandon(RecvFailure::NackExhausted(seq));
                return;
            }
            state.request_counts[seq as usize] += 1;
            state.request_counts[seq as usize]
        };

        let body = ImmediateRequestBody {
            data_id: self.data_id,
            sequence: seq,
            request_count: request_count as i32,
        };
        let frame = Frame::control(
            self.connection_id,
            self.data_id,
            FrameType::ImmediateRequest,
            body.encode(),
        );
        if let Err(err) = self.tx.transmit(&frame) {
            log::debug!(
                "[recv] request transmit failed data={} seq={}: {}",
                self.data_id,
                seq,
                err
            );
        }
        self.arm_request_timer(seq);
    }

    /// Emit an ACK for `seq`, bounded per sequence so a chatty sender
    /// cannot farm unlimited feedback traffic.
    fn send_ack(&self, seq: i32) {
        let body = {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            if state.ack_counts[seq as usize] >= self.max_requests {
                return;
            }
            state.ack_counts[seq as usize] += 1;

            let received_count = state.received_count as i32;
            let batch = if state.received_count > 0 && state.received_count % ACK_BATCH_STRIDE == 0
            {
                (0..self.total)
                    .filter(|&s| state.slots[s as usize].is_some())
                    .take(ACK_BATCH_LIMIT)
                    .collect()
            } else {
                Vec::new()
            };

            AckBody {
                data_id: self.data_id,
                sequence: seq,
                received: true,
                received_count,
                batch,
            }
        };

        self.transmit_ack(body);
    }

    /// ACK path for frames we cannot track per-sequence (out of range).
    fn send_ack_uncapped(&self, seq: i32) {
        let received_count = self.state.lock().received_count as i32;
        self.transmit_ack(AckBody {
            data_id: self.data_id,
            sequence: seq,
            received: true,
            received_count,
            batch: Vec::new(),
        });
    }

    fn transmit_ack(&self, body: AckBody) {
        let frame = Frame::control(
            self.connection_id,
            self.data_id,
            FrameType::Ack,
            body.encode(),
        );
        if let Err(err) = self.tx.transmit(&frame) {
            log::debug!("[recv] ack transmit failed data={}: {}", self.data_id, err);
        } else {
            self.metrics.incr_acks_sent();
        }
    }

    /// Terminal failure: release buffers, cancel timers, unlink.
    fn abandon(&self, failure: RecvFailure) {
        if !self.settle() {
            return;
        }
        log::warn!(
            "[recv] abandoned conn={:#x} data={}: {}",
            self.connection_id,
            self.data_id,
            failure
        );
    }

    /// Settle without delivery. Returns false if already settled.
    fn settle(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.terminal {
                return false;
            }
            state.terminal = true;
            for timer in state.request_timers.iter_mut() {
                if let Some(t) = timer.take() {
                    t.cancel();
                }
            }
            for slot in state.slots.iter_mut() {
                *slot = None;
            }
        }
        if let Some(timer) = self.global_timer.lock().take() {
            timer.cancel();
        }
        if let Some(hook) = self.removal.lock().take() {
            hook();
        }
        true
    }
}
