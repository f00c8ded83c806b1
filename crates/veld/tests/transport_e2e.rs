// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! End-to-end transport scenarios over loopback UDP.
//!
//! Two real endpoints, real sockets, real timers. Loss is injected with
//! the outbound send filter, which drops frames after construction -
//! indistinguishable from wire loss to both state machines.
//!
//! Scenarios:
//! - single-frame payload round-trip (exact frame counts)
//! - multi-frame fragmentation and reassembly
//! - recovery from a single lost DATA frame
//! - total loss of a sequence exhausts the unit within its budget
//! - duplicate DATA frames never double-deliver

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use veld::config::RdtConfig;
use veld::core::TimerWheel;
use veld::transport::{
    filter, Connection, Endpoint, Frame, FrameType, InboundHandler, ResponseCorrelator,
};

/// Records reassembled payloads delivered upward.
struct Recorder {
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            payloads: Mutex::new(Vec::new()),
        })
    }

    fn wait_for(&self, count: usize, budget: Duration) -> bool {
        let deadline = Instant::now() + budget;
        while self.payloads.lock().len() < count {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

impl InboundHandler for Recorder {
    fn on_payload(&self, _conn: &Arc<Connection>, _data_id: u64, payload: Vec<u8>) {
        self.payloads.lock().push(payload);
    }
}

/// Deterministic payload bytes.
fn make_payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn endpoint(cfg: RdtConfig, wheel: &Arc<TimerWheel>) -> (Arc<Endpoint>, Arc<Recorder>) {
    let sink = Recorder::new();
    let ep = Endpoint::bind(
        "127.0.0.1:0".parse().unwrap(),
        cfg,
        Arc::clone(wheel),
        ResponseCorrelator::new(),
        Arc::<Recorder>::clone(&sink) as Arc<dyn InboundHandler>,
    )
    .unwrap();
    (ep, sink)
}

/// Slow timers: nothing fires before the ACK round-trips, so frame
/// counts are exact on a lossless loopback.
fn exact_cfg() -> RdtConfig {
    RdtConfig {
        retransmit_interval_ms: 2_000,
        global_timeout_ms: 10_000,
        ..RdtConfig::default()
    }
}

#[test]
fn test_single_frame_roundtrip_exact_counts() {
    let wheel = TimerWheel::start();
    let (a, _a_sink) = endpoint(exact_cfg(), &wheel);
    let (b, b_sink) = endpoint(exact_cfg(), &wheel);
    let payload = make_payload(500);

    let started = Instant::now();
    let completion = a.send_to(b.local_addr(), &payload).unwrap();
    assert_eq!(
        completion.wait_timeout(Duration::from_secs(5)),
        Some(Ok(())),
        "send future must resolve"
    );
    // Lossless loopback: well inside the nominal 100 ms budget.
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(b_sink.wait_for(1, Duration::from_secs(2)));
    assert_eq!(b_sink.payloads.lock()[0], payload);

    // Exactly one DATA out of A, exactly one ACK out of B.
    assert_eq!(a.metrics().frames_sent, 1);
    assert_eq!(a.metrics().acks_received, 1);
    assert_eq!(b.metrics().acks_sent, 1);

    a.shutdown();
    b.shutdown();
    wheel.shutdown();
}

#[test]
fn test_multi_frame_reassembly_4096() {
    let wheel = TimerWheel::start();
    let (a, _a_sink) = endpoint(exact_cfg(), &wheel);
    let (b, b_sink) = endpoint(exact_cfg(), &wheel);
    let payload = make_payload(4096);

    let completion = a.send_to(b.local_addr(), &payload).unwrap();
    assert_eq!(completion.wait_timeout(Duration::from_secs(5)), Some(Ok(())));

    assert!(b_sink.wait_for(1, Duration::from_secs(2)));
    assert_eq!(b_sink.payloads.lock()[0], payload);

    // total = 4: four DATA frames, four ACKs.
    assert_eq!(a.metrics().frames_sent, 4);
    assert_eq!(b.metrics().acks_sent, 4);

    a.shutdown();
    b.shutdown();
    wheel.shutdown();
}

#[test]
fn test_reassembly_exactness_random_sizes() {
    let wheel = TimerWheel::start();
    let (a, _a_sink) = endpoint(exact_cfg(), &wheel);
    let (b, b_sink) = endpoint(exact_cfg(), &wheel);

    let mut rng = fastrand::Rng::with_seed(42);
    let mut sent = Vec::new();
    for _ in 0..5 {
        let size = rng.usize(1..5 * 1024);
        let payload: Vec<u8> = (0..size).map(|_| rng.u8(..)).collect();
        let completion = a.send_to(b.local_addr(), &payload).unwrap();
        assert_eq!(completion.wait_timeout(Duration::from_secs(5)), Some(Ok(())));
        sent.push(payload);
    }

    assert!(b_sink.wait_for(sent.len(), Duration::from_secs(3)));
    // Payloads may interleave across dataIds; compare as sets of bytes.
    let mut got = b_sink.payloads.lock().clone();
    got.sort();
    sent.sort();
    assert_eq!(got, sent);

    a.shutdown();
    b.shutdown();
    wheel.shutdown();
}

#[test]
fn test_single_frame_loss_recovers() {
    let wheel = TimerWheel::start();
    let cfg = RdtConfig {
        global_timeout_ms: 5_000,
        ..RdtConfig::default()
    };
    let (a, _a_sink) = endpoint(cfg.clone(), &wheel);
    let (b, b_sink) = endpoint(cfg, &wheel);
    let payload = make_payload(3072); // total = 3

    // Drop only the FIRST transmission of DATA sequence 1.
    let dropped = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dropped);
    a.set_send_filter(Some(filter::from_fn(move |frame: &Frame, _: SocketAddr| {
        if frame.frame_type == FrameType::Data
            && frame.sequence == 1
            && counter.fetch_add(1, Ordering::AcqRel) == 0
        {
            return false;
        }
        true
    })));

    let completion = a.send_to(b.local_addr(), &payload).unwrap();
    assert_eq!(
        completion.wait_timeout(Duration::from_secs(5)),
        Some(Ok(())),
        "retransmit or gap request must repair the loss"
    );

    assert!(b_sink.wait_for(1, Duration::from_secs(3)));
    assert_eq!(b_sink.payloads.lock()[0], payload);
    assert!(dropped.load(Ordering::Acquire) >= 1);

    a.shutdown();
    b.shutdown();
    wheel.shutdown();
}

#[test]
fn test_total_loss_exhausts_within_budget() {
    let wheel = TimerWheel::start();
    // Default budgets: 50 ms retransmit, budget 6, 300 ms global.
    let (a, _a_sink) = endpoint(RdtConfig::default(), &wheel);
    let (b, b_sink) = endpoint(RdtConfig::default(), &wheel);
    let payload = make_payload(1024); // single frame, sequence 0

    // Every transmission of DATA is dropped.
    a.set_send_filter(Some(filter::from_fn(|frame: &Frame, _: SocketAddr| {
        frame.frame_type != FrameType::Data
    })));

    let started = Instant::now();
    let completion = a.send_to(b.local_addr(), &payload).unwrap();
    let outcome = completion
        .wait_timeout(Duration::from_secs(3))
        .expect("unit must settle");
    let elapsed = started.elapsed();

    assert!(outcome.is_err(), "send must fail, got {:?}", outcome);
    // 300 ms global budget, plus generous scheduling slop.
    assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);

    // The unit is gone from A's connection; B never delivered anything.
    let conn = a.connection_to(b.local_addr());
    assert_eq!(conn.unit_counts().0, 0);
    assert!(b_sink.payloads.lock().is_empty());

    a.shutdown();
    b.shutdown();
    wheel.shutdown();
}

#[test]
fn test_duplicate_data_frames_deliver_once() {
    let wheel = TimerWheel::start();
    let (b, b_sink) = endpoint(RdtConfig::default(), &wheel);

    // Raw sender: we hand-craft duplicate frames below the transport.
    let raw = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let target = b.local_addr();
    let payload0 = make_payload(700);
    let payload1 = make_payload(300);

    let frame0 = Frame::data(0x1234, 7, 2, 0, payload0.clone());
    let frame1 = Frame::data(0x1234, 7, 2, 1, payload1.clone());

    // Sequence 0 twice before completion.
    raw.send_to(&frame0.encode(), target).unwrap();
    raw.send_to(&frame0.encode(), target).unwrap();
    raw.send_to(&frame1.encode(), target).unwrap();
    // And the whole flight again after completion.
    std::thread::sleep(Duration::from_millis(100));
    raw.send_to(&frame0.encode(), target).unwrap();
    raw.send_to(&frame1.encode(), target).unwrap();

    assert!(b_sink.wait_for(1, Duration::from_secs(2)));
    std::thread::sleep(Duration::from_millis(200));

    let delivered = b_sink.payloads.lock();
    assert_eq!(delivered.len(), 1, "duplicates must not re-deliver");
    let expected: Vec<u8> = [payload0, payload1].concat();
    assert_eq!(delivered[0], expected);

    b.shutdown();
    wheel.shutdown();
}

#[test]
fn test_gap_request_repairs_without_sender_timer() {
    let wheel = TimerWheel::start();
    // Sender retransmit timers parked: only the receiver's
    // IMMEDIATE_REQUEST path can repair the gap.
    let cfg = RdtConfig {
        retransmit_interval_ms: 60_000,
        global_timeout_ms: 30_000,
        ..RdtConfig::default()
    };
    let (a, _a_sink) = endpoint(cfg, &wheel);
    // Receiver runs normal cadence.
    let (b, b_sink) = endpoint(RdtConfig::default(), &wheel);
    let payload = make_payload(2048); // total = 2

    let dropped = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dropped);
    a.set_send_filter(Some(filter::from_fn(move |frame: &Frame, _: SocketAddr| {
        if frame.frame_type == FrameType::Data
            && frame.sequence == 0
            && counter.fetch_add(1, Ordering::AcqRel) == 0
        {
            return false;
        }
        true
    })));

    let completion = a.send_to(b.local_addr(), &payload).unwrap();
    assert_eq!(
        completion.wait_timeout(Duration::from_secs(10)),
        Some(Ok(())),
        "receiver-driven repair must complete the send"
    );
    assert!(b_sink.wait_for(1, Duration::from_secs(2)));
    assert_eq!(b_sink.payloads.lock()[0], payload);

    a.shutdown();
    b.shutdown();
    wheel.shutdown();
}
