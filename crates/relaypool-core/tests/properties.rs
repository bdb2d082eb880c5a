//! Property tests for the quantified invariants: in-flight bounds, circuit
//! breaker determinism, excluded/selected mutual exclusivity, and fairness
//! convergence over a large run.

use proptest::prelude::*;
use relaypool_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use relaypool_core::config::{FairnessMode, PoolConfig};
use relaypool_core::decision_recorder::DecisionRecorder;
use relaypool_core::reason::Reason;
use relaypool_core::scheduler::Scheduler;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy)]
enum Op {
    Select,
    Release(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Select),
        1 => (0usize..8).prop_map(Op::Release),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn in_flight_never_exceeds_max_concurrency(ops in prop::collection::vec(op_strategy(), 0..200)) {
        let mut cfg = PoolConfig::default();
        cfg.max_concurrency_per_key = 2;
        let ids: Vec<String> = (0..3).map(|i| format!("k{i}")).collect();
        let sched = Scheduler::new(cfg, ids, 0);
        let mut rec = DecisionRecorder::new(1_000);
        let mut in_flight_ids: Vec<String> = Vec::new();
        let mut now = 0u64;

        for op in ops {
            now += 1;
            match op {
                Op::Select => {
                    let d = sched.select_key(&HashSet::new(), now, "req", 0, &mut rec);
                    if let Some(id) = d.selected_key_id {
                        in_flight_ids.push(id);
                    }
                }
                Op::Release(n) => {
                    if !in_flight_ids.is_empty() {
                        let id = in_flight_ids.remove(n % in_flight_ids.len());
                        sched.credential(&id).unwrap().release();
                    }
                }
            }
            for cred in sched.credentials() {
                let in_flight = cred.in_flight();
                prop_assert!(in_flight <= 2, "in_flight {in_flight} exceeded max_concurrency_per_key");
            }
        }
    }

    #[test]
    fn circuit_breaker_is_pure_and_replayable(
        events in prop::collection::vec((any::<bool>(), 0u64..5_000), 0..50)
    ) {
        let cfg = CircuitBreakerConfig::default();
        let mut cb_a = CircuitBreaker::new(cfg);
        let mut cb_b = CircuitBreaker::new(cfg);
        let mut now = 0u64;
        for (success, delta) in &events {
            now += delta;
            if *success {
                cb_a.record_success(now);
                cb_b.record_success(now);
            } else {
                cb_a.record_failure(now);
                cb_b.record_failure(now);
            }
        }
        prop_assert_eq!(cb_a.state_kind(), cb_b.state_kind());
        prop_assert_eq!(cb_a.prediction_score(now), cb_b.prediction_score(now));
    }

    #[test]
    fn selected_key_is_never_also_excluded(
        excluded_mask in prop::collection::vec(any::<bool>(), 4),
        rate_limited_mask in prop::collection::vec(any::<bool>(), 4),
    ) {
        let ids: Vec<String> = (0..4).map(|i| format!("k{i}")).collect();
        let sched = Scheduler::new(PoolConfig::default(), ids.clone(), 0);
        let mut excluded = HashSet::new();
        for (i, id) in ids.iter().enumerate() {
            if excluded_mask[i] {
                excluded.insert(id.clone());
            }
            if rate_limited_mask[i] {
                sched.credential(id).unwrap().record_rate_limited(0);
            }
        }
        let mut rec = DecisionRecorder::new(100);
        let d = sched.select_key(&excluded, 0, "req", 0, &mut rec);

        if let Some(sel) = &d.selected_key_id {
            prop_assert!(!excluded.contains(sel));
            prop_assert!(!d.excluded.iter().any(|e| &e.key_id == sel));
        }

        // The reason enum is closed by the Rust type system; this exhaustive
        // match documents that every arm is a known, intentional variant.
        match d.reason {
            Reason::HealthScoreWinner
            | Reason::RoundRobinTurn
            | Reason::LastAvailable
            | Reason::WeightedRandom
            | Reason::CircuitRecovery
            | Reason::RateLimitRotated
            | Reason::SlowKeyAvoided
            | Reason::ForcedFallback
            | Reason::LeastLoaded
            | Reason::FairnessBoost
            | Reason::ExcludedCircuitOpen
            | Reason::ExcludedRateLimited
            | Reason::ExcludedAtMaxConcurrency
            | Reason::ExcludedSlowQuarantine
            | Reason::ExcludedExplicitly
            | Reason::ExcludedTokenExhausted
            | Reason::Unknown => {}
        }
    }
}

#[test]
fn fairness_converges_within_five_percent_over_ten_thousand_selections() {
    let mut cfg = PoolConfig::default();
    cfg.fairness_mode = FairnessMode::Soft;
    let n = 4;
    let ids: Vec<String> = (0..n).map(|i| format!("k{i}")).collect();
    let sched = Scheduler::new(cfg, ids, 0);
    let mut rec = DecisionRecorder::new(10_000);

    for i in 0..10_000u64 {
        let d = sched.select_key(&HashSet::new(), i, "req", 0, &mut rec);
        if let Some(id) = d.selected_key_id {
            sched.credential(&id).unwrap().release();
        }
    }

    let fairness = rec.fairness_metrics();
    let expected_share = 100.0 / n as f64;
    for (key, share) in &fairness.per_key_share {
        assert!(
            (share - expected_share).abs() <= 5.0,
            "key {key} share {share} deviates from expected {expected_share} by more than 5%"
        );
    }
}
