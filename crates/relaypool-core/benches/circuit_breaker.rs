//! Benchmark: circuit breaker hot-path operations under load.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use relaypool_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

fn bench_record_failure(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker_record_failure");
    for &failures_before_trip in &[1u32, 5, 20] {
        group.bench_with_input(
            BenchmarkId::new("failure_threshold", failures_before_trip),
            &failures_before_trip,
            |b, &threshold| {
                b.iter(|| {
                    let mut cb = CircuitBreaker::new(CircuitBreakerConfig {
                        failure_threshold: threshold,
                        ..CircuitBreakerConfig::default()
                    });
                    for i in 0..threshold {
                        cb.record_failure(u64::from(i) * 10);
                    }
                });
            },
        );
    }
    group.finish();
}

fn bench_is_available(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker_is_available");
    group.bench_function("closed", |b| {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        let mut now = 0u64;
        b.iter(|| {
            now += 1;
            cb.is_available(now)
        });
    });
    group.finish();
}

fn bench_prediction_score(c: &mut Criterion) {
    c.bench_function("circuit_breaker_prediction_score", |b| {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        for i in 0..4 {
            cb.record_failure(i * 1_000);
        }
        b.iter(|| cb.prediction_score(5_000));
    });
}

criterion_group!(benches, bench_record_failure, bench_is_available, bench_prediction_score);
criterion_main!(benches);
