//! Per-credential circuit breaker.
//!
//! A CLOSED/OPEN/HALF_OPEN state machine driven by failure density within a
//! sliding window. All operations are infallible: they either update state
//! or are no-ops. Timestamps are passed in as `now_ms` rather than read from
//! the clock, so tests can replay literal scenarios deterministically.
//!
//! # Algorithm
//!
//! - CLOSED -> OPEN when failures within `failure_window_ms` reach
//!   `failure_threshold`.
//! - OPEN -> HALF_OPEN after `cooldown_period_ms` elapses.
//! - HALF_OPEN admits exactly one probe at a time; a success closes the
//!   circuit, a failure (or probe timeout) reopens it.

use crate::ring_buffer::RingBuffer;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Circuit breaker tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub failure_window_ms: u64,
    pub cooldown_period_ms: u64,
    pub half_open_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_ms: 30_000,
            cooldown_period_ms: 60_000,
            half_open_timeout_ms: 10_000,
        }
    }
}

/// Public state kind, independent of the timestamps/flags carried inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { opened_at_ms: u64 },
    HalfOpen {
        started_at_ms: u64,
        probe_in_flight: bool,
    },
}

/// Per-credential circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_timestamps: RingBuffer<u64>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let cap = (config.failure_threshold as usize * 4).max(16);
        Self {
            config,
            state: CircuitState::Closed,
            failure_timestamps: RingBuffer::new(cap),
        }
    }

    fn prune_window(&mut self, now_ms: u64) {
        let window = self.config.failure_window_ms;
        self.failure_timestamps
            .retain(|&ts| now_ms.saturating_sub(ts) <= window);
    }

    /// Apply time-driven transitions (OPEN -> HALF_OPEN, probe timeout).
    /// Called at the start of every read/write operation.
    pub fn update_state(&mut self, now_ms: u64) {
        match self.state {
            CircuitState::Open { opened_at_ms } => {
                if now_ms.saturating_sub(opened_at_ms) >= self.config.cooldown_period_ms {
                    self.state = CircuitState::HalfOpen {
                        started_at_ms: now_ms,
                        probe_in_flight: false,
                    };
                    info!("circuit transitioned to half-open after cooldown");
                }
            }
            CircuitState::HalfOpen { started_at_ms, .. } => {
                if now_ms.saturating_sub(started_at_ms) >= self.config.half_open_timeout_ms {
                    self.state = CircuitState::Open {
                        opened_at_ms: now_ms,
                    };
                    warn!("half-open probe timed out; circuit reopened");
                }
            }
            CircuitState::Closed => {}
        }
    }

    /// Whether a request may be admitted right now.
    pub fn is_available(&mut self, now_ms: u64) -> bool {
        self.update_state(now_ms);
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen { probe_in_flight, .. } => !probe_in_flight,
            CircuitState::Open { .. } => false,
        }
    }

    /// Atomically claim the single HALF_OPEN probe slot. Returns `true` if
    /// this caller now owns the probe.
    pub fn try_acquire_test_request(&mut self, now_ms: u64) -> bool {
        self.update_state(now_ms);
        if let CircuitState::HalfOpen {
            started_at_ms,
            probe_in_flight: false,
        } = self.state
        {
            self.state = CircuitState::HalfOpen {
                started_at_ms,
                probe_in_flight: true,
            };
            true
        } else {
            false
        }
    }

    /// Record a successful operation.
    pub fn record_success(&mut self, now_ms: u64) {
        self.update_state(now_ms);
        match self.state {
            CircuitState::HalfOpen { .. } => {
                self.state = CircuitState::Closed;
                self.failure_timestamps.clear();
                info!("circuit closed after successful probe");
            }
            CircuitState::Closed => {
                // window pruning on the next failure is sufficient; a lone
                // success doesn't need to touch the failure history.
            }
            CircuitState::Open { .. } => {
                // stray success while open (a late response); ignored.
            }
        }
    }

    /// Record a failed operation.
    pub fn record_failure(&mut self, now_ms: u64) {
        self.update_state(now_ms);
        match self.state {
            CircuitState::Closed => {
                self.failure_timestamps.push(now_ms);
                self.prune_window(now_ms);
                if self.failure_timestamps.len() as u32 >= self.config.failure_threshold {
                    self.state = CircuitState::Open {
                        opened_at_ms: now_ms,
                    };
                    warn!(
                        failures = self.failure_timestamps.len(),
                        threshold = self.config.failure_threshold,
                        "circuit opened after failure threshold reached"
                    );
                }
            }
            CircuitState::HalfOpen { .. } => {
                self.state = CircuitState::Open {
                    opened_at_ms: now_ms,
                };
                warn!("circuit reopened after half-open probe failure");
            }
            CircuitState::Open { .. } => {
                // already open; cooldown keeps ticking from its original start.
            }
        }
    }

    /// Force a state transition, bypassing the normal rules. Used by the
    /// scheduler's no-available-keys fallback to force a recovery probe.
    /// Still emits the same state-change event as a natural transition, and
    /// moving into HALF_OPEN re-arms `half_open_timeout_ms` from `now_ms`.
    pub fn force_state(&mut self, kind: CircuitStateKind, now_ms: u64) {
        self.state = match kind {
            CircuitStateKind::Closed => {
                self.failure_timestamps.clear();
                info!("circuit force-closed");
                CircuitState::Closed
            }
            CircuitStateKind::Open => {
                warn!("circuit forced open");
                CircuitState::Open {
                    opened_at_ms: now_ms,
                }
            }
            CircuitStateKind::HalfOpen => {
                info!("circuit forced to half-open; probe timeout re-armed");
                CircuitState::HalfOpen {
                    started_at_ms: now_ms,
                    probe_in_flight: false,
                }
            }
        };
    }

    #[must_use]
    pub fn state_kind(&self) -> CircuitStateKind {
        match self.state {
            CircuitState::Closed => CircuitStateKind::Closed,
            CircuitState::Open { .. } => CircuitStateKind::Open,
            CircuitState::HalfOpen { .. } => CircuitStateKind::HalfOpen,
        }
    }

    #[must_use]
    pub fn opened_at_ms(&self) -> Option<u64> {
        match self.state {
            CircuitState::Open { opened_at_ms } => Some(opened_at_ms),
            _ => None,
        }
    }

    /// A 0-100 trip-likelihood score from recent failure ratio, acceleration
    /// (share of recent-window failures falling in the newer half), and
    /// recency of the last failure. Weights are fixed: ratio 35,
    /// acceleration 40, recency 25.
    #[must_use]
    pub fn prediction_score(&self, now_ms: u64) -> u8 {
        let window = self.config.failure_window_ms;
        let threshold = self.config.failure_threshold as f64;

        let in_window: Vec<u64> = self
            .failure_timestamps
            .iter()
            .copied()
            .filter(|&ts| now_ms.saturating_sub(ts) <= window)
            .collect();

        let ratio = (in_window.len() as f64 / threshold).min(1.0);

        let half = window / 2;
        let newer = in_window
            .iter()
            .filter(|&&ts| now_ms.saturating_sub(ts) <= half)
            .count();
        let older = in_window.len() - newer;
        // Newer-half share in excess of the older half, so a window front-
        // loaded with recent failures accelerates the score and a window
        // front-loaded with old failures does not.
        let acceleration = if in_window.is_empty() {
            0.0
        } else {
            ((newer as f64 - older as f64) / in_window.len() as f64).max(0.0)
        };

        let recency = match in_window.iter().max() {
            None => 0.0,
            Some(&last) => {
                let age = now_ms.saturating_sub(last);
                if age < 1_000 {
                    1.0
                } else if age < 5_000 {
                    0.7
                } else if age < 15_000 {
                    0.4
                } else if age < window {
                    0.2
                } else {
                    0.0
                }
            }
        };

        let score = ratio * 35.0 + acceleration * 40.0 + recency * 25.0;
        score.round().clamp(0.0, 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            failure_window_ms: 30_000,
            cooldown_period_ms: 60_000,
            half_open_timeout_ms: 10_000,
        }
    }

    #[test]
    fn starts_closed_and_available() {
        let mut cb = CircuitBreaker::new(cfg());
        assert_eq!(cb.state_kind(), CircuitStateKind::Closed);
        assert!(cb.is_available(0));
    }

    #[test]
    fn opens_exactly_at_threshold() {
        let mut cb = CircuitBreaker::new(cfg());
        cb.record_failure(0);
        cb.record_failure(1_000);
        assert_eq!(cb.state_kind(), CircuitStateKind::Closed);
        cb.record_failure(2_000);
        assert_eq!(cb.state_kind(), CircuitStateKind::Open);
    }

    #[test]
    fn open_transitions_to_half_open_after_cooldown() {
        let mut cb = CircuitBreaker::new(cfg());
        cb.record_failure(0);
        cb.record_failure(1_000);
        cb.record_failure(2_000);
        assert!(!cb.is_available(2_500));
        assert!(cb.is_available(62_000));
        assert_eq!(cb.state_kind(), CircuitStateKind::HalfOpen);
    }

    #[test]
    fn half_open_admits_single_probe() {
        let mut cb = CircuitBreaker::new(cfg());
        cb.force_state(CircuitStateKind::HalfOpen, 0);
        assert!(cb.try_acquire_test_request(0));
        assert!(!cb.try_acquire_test_request(0));
        assert!(!cb.is_available(0));
    }

    #[test]
    fn half_open_success_closes() {
        let mut cb = CircuitBreaker::new(cfg());
        cb.force_state(CircuitStateKind::HalfOpen, 0);
        cb.try_acquire_test_request(0);
        cb.record_success(0);
        assert_eq!(cb.state_kind(), CircuitStateKind::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let mut cb = CircuitBreaker::new(cfg());
        cb.force_state(CircuitStateKind::HalfOpen, 0);
        cb.try_acquire_test_request(0);
        cb.record_failure(0);
        assert_eq!(cb.state_kind(), CircuitStateKind::Open);
    }

    #[test]
    fn half_open_timeout_reverts_to_open_not_closed() {
        let mut cb = CircuitBreaker::new(cfg());
        cb.force_state(CircuitStateKind::HalfOpen, 0);
        cb.try_acquire_test_request(0);
        assert!(!cb.is_available(10_000));
        assert_eq!(cb.state_kind(), CircuitStateKind::Open);
    }

    #[test]
    fn failures_outside_window_do_not_count() {
        let mut cb = CircuitBreaker::new(cfg());
        cb.record_failure(0);
        cb.record_failure(1_000);
        cb.record_failure(40_000); // outside the 30s window from t=0,1000
        assert_eq!(cb.state_kind(), CircuitStateKind::Closed);
    }

    #[test]
    fn force_state_round_trips_through_get_stats_equivalent() {
        let mut cb = CircuitBreaker::new(cfg());
        for kind in [
            CircuitStateKind::Open,
            CircuitStateKind::HalfOpen,
            CircuitStateKind::Closed,
        ] {
            cb.force_state(kind, 0);
            assert_eq!(cb.state_kind(), kind);
        }
    }

    #[test]
    fn prediction_score_is_bounded_and_reproducible() {
        let mut cb = CircuitBreaker::new(cfg());
        cb.record_failure(0);
        cb.record_failure(1_000);
        let a = cb.prediction_score(1_500);
        let b = cb.prediction_score(1_500);
        assert_eq!(a, b);
        assert!(a <= 100);
    }

    #[test]
    fn prediction_score_zero_with_no_failures() {
        let cb = CircuitBreaker::new(cfg());
        assert_eq!(cb.prediction_score(0), 0);
    }

    #[test]
    fn forcing_half_open_re_arms_the_probe_timeout_from_now() {
        let mut cb = CircuitBreaker::new(cfg());
        cb.force_state(CircuitStateKind::HalfOpen, 50_000);
        // still within half_open_timeout_ms (10s) of the forced start
        assert!(cb.is_available(59_000));
        assert_eq!(cb.state_kind(), CircuitStateKind::HalfOpen);
        // past it, the probe timed out and the circuit reopens
        assert!(!cb.is_available(60_001));
        assert_eq!(cb.state_kind(), CircuitStateKind::Open);
    }

    #[test]
    fn acceleration_rewards_failures_clustered_in_the_newer_half() {
        // window = 30s, half = 15s; "now" = 30_000 so both an older half
        // (age in (15s, 30s]) and a newer half (age <= 15s) are reachable.
        let mut newer_heavy = CircuitBreaker::new(cfg());
        newer_heavy.record_failure(28_000);
        newer_heavy.record_failure(29_000);
        newer_heavy.record_failure(29_500);
        let newer_score = newer_heavy.prediction_score(30_000);

        let mut older_heavy = CircuitBreaker::new(cfg());
        older_heavy.record_failure(1_000);
        older_heavy.record_failure(2_000);
        older_heavy.record_failure(3_000);
        let older_score = older_heavy.prediction_score(30_000);

        assert!(newer_score > older_score);
    }
}
