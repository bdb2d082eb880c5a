//! A trivial upstream stand-in for local exploration of the control plane.
//!
//! Returns synthetic latencies and a configurable failure rate; has no
//! notion of credentials or models. Not a test double for correctness
//! testing (relaypool-core's own unit tests cover that) - just enough to
//! drive `relaypoolctl simulate`.

use rand::Rng;
use relaypool_core::collaborators::CallOutcome;

pub struct MockDispatcher {
    failure_rate: f64,
}

impl MockDispatcher {
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }

    pub fn call(&self, now_ms: u64) -> CallOutcome {
        let mut rng = rand::thread_rng();
        let roll: f64 = rng.gen_range(0.0..1.0);
        if roll < self.failure_rate {
            if roll < self.failure_rate * 0.2 {
                CallOutcome::RateLimited
            } else {
                CallOutcome::TransientError
            }
        } else {
            let latency_ms = 50 + (now_ms % 150);
            CallOutcome::Success { latency_ms }
        }
    }
}
