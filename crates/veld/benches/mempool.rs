// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Mempool admission and selection throughput.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use veld::config::MempoolConfig;
use veld::mempool::{Mempool, Transaction};

fn tx(id: u64, fee: u64) -> Transaction {
    Transaction::new(format!("tx-{:012}", id), "bench", fee, 1_000, 60_000, vec![0u8; 64]).unwrap()
}

fn bench_admit(c: &mut Criterion) {
    c.bench_function("mempool_admit_10k", |b| {
        b.iter_batched(
            || {
                let pool = Mempool::new(MempoolConfig::default());
                let txs: Vec<Transaction> = (0..10_000).map(|i| tx(i, i % 997)).collect();
                (pool, txs)
            },
            |(pool, txs)| {
                for t in txs {
                    let _ = pool.add(t);
                }
                pool
            },
            BatchSize::LargeInput,
        );
    });
}

fn bench_select(c: &mut Criterion) {
    c.bench_function("mempool_select_top_4096_of_100k", |b| {
        b.iter_batched(
            || {
                let pool = Mempool::new(MempoolConfig::default());
                for i in 0..100_000 {
                    let _ = pool.add(tx(i, (i * 7919) % 1_000_000));
                }
                pool
            },
            |pool| pool.select_and_remove_top(4_096),
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_admit, bench_select);
criterion_main!(benches);
