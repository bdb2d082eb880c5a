//! Benchmark: credential selection throughput at various pool sizes.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use relaypool_core::config::PoolConfig;
use relaypool_core::decision_recorder::DecisionRecorder;
use relaypool_core::scheduler::Scheduler;
use std::collections::HashSet;

fn bench_select_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_select_key");
    for &pool_size in &[4usize, 16, 64] {
        group.bench_with_input(BenchmarkId::new("pool_size", pool_size), &pool_size, |b, &n| {
            let ids: Vec<String> = (0..n).map(|i| format!("key-{i}")).collect();
            let sched = Scheduler::new(PoolConfig::default(), ids, 0);
            let mut recorder = DecisionRecorder::new(1_000);
            let excluded = HashSet::new();
            let mut now = 0u64;
            b.iter(|| {
                now += 1;
                let decision = sched.select_key(&excluded, now, "bench", 0, &mut recorder);
                if let Some(key_id) = decision.selected_key_id {
                    sched.credential(&key_id).unwrap().release();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_select_key);
criterion_main!(benches);
