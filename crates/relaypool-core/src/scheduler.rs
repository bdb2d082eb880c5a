//! Credential scheduler: explainable selection over the credential pool.
//!
//! Owns the pool of credentials and, for each request, picks one using the
//! exclusion-reason precedence chain followed by a configurable strategy
//! (weighted health score or round robin), with fairness boosting,
//! quarantine, and a no-available-keys fallback. `select_key` never panics
//! or returns an `Err` — every outcome is a [`Decision`], even a failed one.

use crate::circuit_breaker::{CircuitBreaker, CircuitStateKind};
use crate::config::{FairnessMode, PoolConfig};
use crate::decision::{Decision, ExcludedCandidate, PoolState, ScoreBreakdown};
use crate::decision_recorder::DecisionRecorder;
use crate::rate_limiter::{KeyRateLimiter, RateLimitDecision};
use crate::reason::Reason;
use crate::ring_buffer::RingBuffer;
use crate::strategies::{self, CandidateStats, ScoredCandidate};
use rand::thread_rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

const LATENCY_SAMPLE_CAPACITY: usize = 100;
const RECENT_FAILURE_WINDOW_MS: u64 = 60_000;

struct CredentialState {
    in_flight: u32,
    total_requests: u64,
    total_successes: u64,
    last_used_ms: Option<u64>,
    circuit: CircuitBreaker,
    latency_samples: RingBuffer<u64>,
    recent_failures: RingBuffer<u64>,
    rate_limiter: KeyRateLimiter,
    explicitly_excluded: bool,
    quarantined: bool,
    quarantined_at_ms: Option<u64>,
    last_quarantine_probe_ms: Option<u64>,
}

/// One credential in the pool: a stable id, a dense index, and its mutable
/// runtime state behind a single mutex (the hot path is cheap arithmetic,
/// not I/O, so one lock per credential is preferable to a command-channel
/// actor here).
pub struct Credential {
    pub id: String,
    pub index: usize,
    state: Mutex<CredentialState>,
}

impl Credential {
    #[must_use]
    pub fn new(id: impl Into<String>, index: usize, config: &PoolConfig, now_ms: u64) -> Self {
        Self {
            id: id.into(),
            index,
            state: Mutex::new(CredentialState {
                in_flight: 0,
                total_requests: 0,
                total_successes: 0,
                last_used_ms: None,
                circuit: CircuitBreaker::new(config.circuit_breaker),
                latency_samples: RingBuffer::new(LATENCY_SAMPLE_CAPACITY),
                recent_failures: RingBuffer::new(64),
                rate_limiter: KeyRateLimiter::new(
                    config.rate_limit_per_minute,
                    500,
                    config.pool_cooldown.cap_ms,
                    now_ms,
                ),
                explicitly_excluded: false,
                quarantined: false,
                quarantined_at_ms: None,
                last_quarantine_probe_ms: None,
            }),
        }
    }

    pub fn set_explicitly_excluded(&self, excluded: bool) {
        self.state.lock().unwrap().explicitly_excluded = excluded;
    }

    pub fn record_success(&self, now_ms: u64, latency_ms: u64) {
        let mut s = self.state.lock().unwrap();
        s.circuit.record_success(now_ms);
        s.rate_limiter.record_success();
        s.total_requests += 1;
        s.total_successes += 1;
        s.last_used_ms = Some(now_ms);
        s.latency_samples.push(latency_ms);
        if s.quarantined {
            // a clean probe response releases quarantine
            s.quarantined = false;
            s.quarantined_at_ms = None;
        }
    }

    pub fn record_failure(&self, now_ms: u64) {
        let mut s = self.state.lock().unwrap();
        s.circuit.record_failure(now_ms);
        s.total_requests += 1;
        s.last_used_ms = Some(now_ms);
        s.recent_failures.push(now_ms);
        s.recent_failures
            .retain(|&ts| now_ms.saturating_sub(ts) <= RECENT_FAILURE_WINDOW_MS);
    }

    pub fn record_rate_limited(&self, now_ms: u64) {
        let mut s = self.state.lock().unwrap();
        s.rate_limiter.record_rate_limited(now_ms);
    }

    pub fn enter_quarantine(&self, now_ms: u64) {
        let mut s = self.state.lock().unwrap();
        s.quarantined = true;
        s.quarantined_at_ms = Some(now_ms);
    }

    pub fn acquire(&self) {
        self.state.lock().unwrap().in_flight += 1;
    }

    pub fn release(&self) {
        let mut s = self.state.lock().unwrap();
        s.in_flight = s.in_flight.saturating_sub(1);
    }

    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.state.lock().unwrap().in_flight
    }

    /// This credential's own exclusion reason, independent of any specific
    /// request's exclude list — for the snapshot/explain surface. Mirrors
    /// the precedence chain in [`exclusion_reason`] but never perturbs
    /// scheduling state (it doesn't consume the quarantine probe window).
    #[must_use]
    pub fn current_exclusion_reason(&self, config: &PoolConfig, now_ms: u64) -> Option<Reason> {
        let mut s = self.state.lock().unwrap();
        if s.explicitly_excluded {
            return Some(Reason::ExcludedExplicitly);
        }
        if !s.circuit.is_available(now_ms) {
            return Some(Reason::ExcludedCircuitOpen);
        }
        if s.in_flight >= config.max_concurrency_per_key {
            return Some(Reason::ExcludedAtMaxConcurrency);
        }
        if s.quarantined {
            let elapsed = now_ms.saturating_sub(s.quarantined_at_ms.unwrap_or(now_ms));
            if elapsed < config.slow_key_quarantine_duration_ms {
                return Some(Reason::ExcludedSlowQuarantine);
            }
        }
        match s.rate_limiter.peek(now_ms) {
            RateLimitDecision::InCooldown => Some(Reason::ExcludedRateLimited),
            RateLimitDecision::TokensExhausted => Some(Reason::ExcludedTokenExhausted),
            RateLimitDecision::Allowed => None,
        }
    }
}

/// Why a candidate didn't make it into the selectable pool for this round,
/// tried in this precedence order (first match wins).
fn exclusion_reason(
    cred: &Credential,
    excluded_ids: &HashSet<String>,
    config: &PoolConfig,
    now_ms: u64,
) -> Option<Reason> {
    if excluded_ids.contains(&cred.id) {
        return Some(Reason::ExcludedExplicitly);
    }
    let mut s = cred.state.lock().unwrap();
    if s.explicitly_excluded {
        return Some(Reason::ExcludedExplicitly);
    }
    if !s.circuit.is_available(now_ms) {
        return Some(Reason::ExcludedCircuitOpen);
    }
    if s.in_flight >= config.max_concurrency_per_key {
        return Some(Reason::ExcludedAtMaxConcurrency);
    }
    if s.quarantined {
        let elapsed = now_ms.saturating_sub(s.quarantined_at_ms.unwrap_or(now_ms));
        let probe_due = s
            .last_quarantine_probe_ms
            .is_none_or(|t| now_ms.saturating_sub(t) >= config.quarantine_probe_interval_ms);
        if elapsed < config.slow_key_quarantine_duration_ms && !probe_due {
            return Some(Reason::ExcludedSlowQuarantine);
        }
        if probe_due {
            s.last_quarantine_probe_ms = Some(now_ms);
        }
    }
    // cooldown is checked ahead of the bucket; the two signals are mutually
    // exclusive per decision (see DESIGN.md open question #3).
    match s.rate_limiter.peek(now_ms) {
        RateLimitDecision::InCooldown => Some(Reason::ExcludedRateLimited),
        RateLimitDecision::TokensExhausted => Some(Reason::ExcludedTokenExhausted),
        RateLimitDecision::Allowed => None,
    }
}

/// Cached health score, refreshed by the background task every
/// `score_cache_ttl_ms` and read on the selection hot path; a cache miss
/// (expired or never computed) falls back to a live computation.
struct CachedScore {
    breakdown: ScoreBreakdown,
    computed_at_ms: u64,
}

/// The credential scheduler.
pub struct Scheduler {
    config: PoolConfig,
    credentials: Vec<Credential>,
    round_robin_counter: AtomicUsize,
    score_cache: RwLock<HashMap<String, CachedScore>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(config: PoolConfig, credential_ids: Vec<String>, now_ms: u64) -> Self {
        let credentials = credential_ids
            .into_iter()
            .enumerate()
            .map(|(index, id)| Credential::new(id, index, &config, now_ms))
            .collect();
        Self {
            config,
            credentials,
            round_robin_counter: AtomicUsize::new(0),
            score_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Recompute and cache the health score for every credential. Intended
    /// to be driven by a background task every `score_cache_ttl_ms`; the
    /// selection path still works correctly (just uncached) if this is
    /// never called.
    pub fn refresh_score_cache(&self, now_ms: u64) {
        let indices: Vec<usize> = (0..self.credentials.len()).collect();
        let pool_avg_latency_ms = self.pool_average_latency_ms(&indices);
        let total_selected: u64 = self
            .credentials
            .iter()
            .map(|c| c.state.lock().unwrap().total_requests)
            .sum::<u64>()
            .max(1);
        let expected_share = 100.0 / self.credentials.len().max(1) as f64;

        let mut fresh = HashMap::with_capacity(self.credentials.len());
        for cred in &self.credentials {
            let s = cred.state.lock().unwrap();
            let stats = CandidateStats {
                p50_latency_ms: s.latency_samples.percentiles().map(|p| p.p50),
                pool_avg_latency_ms,
                is_slow_or_quarantined: s.quarantined,
                success_rate: if s.total_requests > 0 {
                    Some(s.total_successes as f64 / s.total_requests as f64)
                } else {
                    None
                },
                recent_failures_60s: s.recent_failures.len() as u32,
                last_used_ms: s.last_used_ms,
                in_flight: s.in_flight,
                selection_share_percent: s.total_requests as f64 / total_selected as f64 * 100.0,
                expected_share_percent: expected_share,
                ms_since_last_use: s.last_used_ms.map(|t| now_ms.saturating_sub(t)),
            };
            drop(s);
            let breakdown = strategies::health_score(
                &stats,
                &self.config.health_score_weights,
                self.config.fairness_mode,
                self.config.fairness_boost_factor,
                self.config.starvation_threshold_ms,
            );
            fresh.insert(
                cred.id.clone(),
                CachedScore {
                    breakdown,
                    computed_at_ms: now_ms,
                },
            );
        }
        *self.score_cache.write().unwrap() = fresh;
    }

    fn cached_score(&self, key_id: &str, now_ms: u64) -> Option<ScoreBreakdown> {
        let cache = self.score_cache.read().unwrap();
        let entry = cache.get(key_id)?;
        if now_ms.saturating_sub(entry.computed_at_ms) <= self.config.score_cache_ttl_ms {
            Some(entry.breakdown)
        } else {
            None
        }
    }

    #[must_use]
    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn credential(&self, id: &str) -> Option<&Credential> {
        self.credentials.iter().find(|c| c.id == id)
    }

    /// Select a credential for one request. Always returns a `Decision`,
    /// whether or not a credential was chosen.
    pub fn select_key(
        &self,
        excluded_ids: &HashSet<String>,
        now_ms: u64,
        request_id: &str,
        attempt: u32,
        recorder: &mut DecisionRecorder,
    ) -> Decision {
        let mut excluded_candidates = Vec::new();
        let mut available_indices = Vec::new();

        for cred in &self.credentials {
            match exclusion_reason(cred, excluded_ids, &self.config, now_ms) {
                Some(reason) => excluded_candidates.push(ExcludedCandidate {
                    key_id: cred.id.clone(),
                    reason,
                }),
                None => available_indices.push(cred.index),
            }
        }

        if available_indices.is_empty() {
            return self.no_available_keys_fallback(
                excluded_ids,
                excluded_candidates,
                now_ms,
                request_id,
                attempt,
                recorder,
            );
        }

        // Prefer CLOSED circuits over HALF_OPEN among available candidates.
        let closed: Vec<usize> = available_indices
            .iter()
            .copied()
            .filter(|&i| {
                self.credentials[i].state.lock().unwrap().circuit.state_kind()
                    == CircuitStateKind::Closed
            })
            .collect();
        let pool_indices: Vec<usize> = if closed.is_empty() {
            available_indices.clone()
        } else {
            closed
        };

        // Defense-in-depth: re-check in-flight capacity.
        let capacity_ok: Vec<usize> = pool_indices
            .iter()
            .copied()
            .filter(|&i| self.credentials[i].in_flight() < self.config.max_concurrency_per_key)
            .collect();
        if capacity_ok.is_empty() {
            let decision = self.build_decision(
                None,
                Reason::ExcludedAtMaxConcurrency,
                None,
                now_ms,
                request_id,
                attempt,
                excluded_candidates,
                recorder,
            );
            recorder.record(decision.clone());
            return decision;
        }

        // A rate-limited credential is already removed from `available_indices`
        // by `exclusion_reason` above; traffic landing on the remaining pool
        // is a rotation away from it, which we surface as a distinct reason
        // rather than reporting the strategy's ordinary pick reason.
        let final_pool = capacity_ok;
        let rotated = excluded_candidates
            .iter()
            .any(|e| e.reason == Reason::ExcludedRateLimited);

        for &i in &final_pool {
            recorder.record_opportunity(&self.credentials[i].id);
        }

        if final_pool.len() == 1 {
            let idx = final_pool[0];
            let reason = if rotated {
                Reason::RateLimitRotated
            } else {
                Reason::LastAvailable
            };
            let decision = self.build_decision(
                Some(idx),
                reason,
                None,
                now_ms,
                request_id,
                attempt,
                excluded_candidates,
                recorder,
            );
            recorder.record(decision.clone());
            return decision;
        }

        let (idx, mut reason, breakdown) = self.apply_strategy(&final_pool, now_ms);
        if rotated && reason != Reason::FairnessBoost {
            reason = Reason::RateLimitRotated;
        }
        let decision = self.build_decision(
            Some(idx),
            reason,
            breakdown,
            now_ms,
            request_id,
            attempt,
            excluded_candidates,
            recorder,
        );
        recorder.record(decision.clone());
        decision
    }

    fn apply_strategy(
        &self,
        pool_indices: &[usize],
        now_ms: u64,
    ) -> (usize, Reason, Option<ScoreBreakdown>) {
        if !self.config.use_weighted_selection {
            let counter = self.round_robin_counter.fetch_add(1, Ordering::Relaxed);
            let local =
                strategies::round_robin_select(pool_indices.len(), counter).unwrap_or(0);
            return (pool_indices[local], Reason::RoundRobinTurn, None);
        }

        let pool_avg_latency_ms = self.pool_average_latency_ms(pool_indices);
        let total_selected: u64 = pool_indices
            .iter()
            .map(|&i| self.credentials[i].state.lock().unwrap().total_requests)
            .sum::<u64>()
            .max(1);
        let expected_share = 100.0 / pool_indices.len() as f64;

        let mut scored = Vec::with_capacity(pool_indices.len());
        for &i in pool_indices {
            let cred = &self.credentials[i];
            if let Some(breakdown) = self.cached_score(&cred.id, now_ms) {
                scored.push(ScoredCandidate {
                    key_id: cred.id.clone(),
                    breakdown,
                });
                continue;
            }
            let s = cred.state.lock().unwrap();
            let p50 = s.latency_samples.percentiles().map(|p| p.p50);
            let success_rate = if s.total_requests > 0 {
                Some(s.total_successes as f64 / s.total_requests as f64)
            } else {
                None
            };
            let ms_since_last_use = s.last_used_ms.map(|t| now_ms.saturating_sub(t));
            let selection_share_percent = s.total_requests as f64 / total_selected as f64 * 100.0;
            let stats = CandidateStats {
                p50_latency_ms: p50,
                pool_avg_latency_ms,
                is_slow_or_quarantined: s.quarantined,
                success_rate,
                recent_failures_60s: s.recent_failures.len() as u32,
                last_used_ms: s.last_used_ms,
                in_flight: s.in_flight,
                selection_share_percent,
                expected_share_percent: expected_share,
                ms_since_last_use,
            };
            drop(s);
            let breakdown = strategies::health_score(
                &stats,
                &self.config.health_score_weights,
                self.config.fairness_mode,
                self.config.fairness_boost_factor,
                self.config.starvation_threshold_ms,
            );
            scored.push(ScoredCandidate {
                key_id: cred.id.clone(),
                breakdown,
            });
        }

        // Strict fairness: a starved candidate must win regardless of the
        // weighted draw.
        if self.config.fairness_mode == FairnessMode::Strict {
            if let Some((i, sc)) = scored.iter().enumerate().find(|(_, sc)| {
                pool_indices
                    .iter()
                    .find(|&&idx| self.credentials[idx].id == sc.key_id)
                    .and_then(|&idx| self.credentials[idx].state.lock().unwrap().last_used_ms)
                    .is_none_or(|t| now_ms.saturating_sub(t) > self.config.starvation_threshold_ms)
            }) {
                return (pool_indices[i], Reason::FairnessBoost, Some(sc.breakdown));
            }
        }

        let mut rng = thread_rng();
        match strategies::weighted_select(&scored, &mut rng) {
            Some((i, reason)) => (pool_indices[i], reason, Some(scored[i].breakdown)),
            None => {
                let counter = self.round_robin_counter.fetch_add(1, Ordering::Relaxed);
                let local =
                    strategies::round_robin_select(pool_indices.len(), counter).unwrap_or(0);
                (pool_indices[local], Reason::RoundRobinTurn, None)
            }
        }
    }

    fn pool_average_latency_ms(&self, pool_indices: &[usize]) -> Option<f64> {
        let samples: Vec<u64> = pool_indices
            .iter()
            .filter_map(|&i| {
                self.credentials[i]
                    .state
                    .lock()
                    .unwrap()
                    .latency_samples
                    .percentiles()
                    .map(|p| p.p50)
            })
            .collect();
        if samples.is_empty() {
            None
        } else {
            Some(samples.iter().sum::<u64>() as f64 / samples.len() as f64)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn no_available_keys_fallback(
        &self,
        excluded_ids: &HashSet<String>,
        excluded_candidates: Vec<ExcludedCandidate>,
        now_ms: u64,
        request_id: &str,
        attempt: u32,
        recorder: &mut DecisionRecorder,
    ) -> Decision {
        let non_excluded: Vec<usize> = self
            .credentials
            .iter()
            .filter(|c| !excluded_ids.contains(&c.id) && !c.state.lock().unwrap().explicitly_excluded)
            .map(|c| c.index)
            .collect();

        // 1. Pick the oldest-OPEN non-excluded circuit and force a probe.
        let oldest_open = non_excluded
            .iter()
            .copied()
            .filter_map(|i| {
                let mut s = self.credentials[i].state.lock().unwrap();
                s.circuit.update_state(now_ms);
                s.circuit.opened_at_ms().map(|opened_at| (i, opened_at))
            })
            .min_by_key(|&(_, opened_at)| opened_at);

        if let Some((idx, _)) = oldest_open {
            self.credentials[idx]
                .state
                .lock()
                .unwrap()
                .circuit
                .force_state(CircuitStateKind::HalfOpen, now_ms);
            let decision = self.build_decision(
                Some(idx),
                Reason::CircuitRecovery,
                None,
                now_ms,
                request_id,
                attempt,
                excluded_candidates,
                recorder,
            );
            recorder.record(decision.clone());
            return decision;
        }

        // 2. Everyone is explicitly excluded.
        if non_excluded.is_empty() {
            let decision = self.build_decision(
                None,
                Reason::ExcludedExplicitly,
                None,
                now_ms,
                request_id,
                attempt,
                excluded_candidates,
                recorder,
            );
            recorder.record(decision.clone());
            return decision;
        }

        // 3. Reset all non-excluded circuits, pick minimum in-flight (ties
        //    broken by lower index, which `min_by_key` gives us for free
        //    since `non_excluded` is built in index order).
        for &i in &non_excluded {
            self.credentials[i]
                .state
                .lock()
                .unwrap()
                .circuit
                .force_state(CircuitStateKind::Closed, now_ms);
        }
        let idx = non_excluded
            .iter()
            .copied()
            .min_by_key(|&i| self.credentials[i].in_flight())
            .expect("non_excluded is non-empty in this branch");

        let decision = self.build_decision(
            Some(idx),
            Reason::ForcedFallback,
            None,
            now_ms,
            request_id,
            attempt,
            excluded_candidates,
            recorder,
        );
        recorder.record(decision.clone());
        decision
    }

    #[allow(clippy::too_many_arguments)]
    fn build_decision(
        &self,
        chosen_index: Option<usize>,
        reason: Reason,
        score: Option<ScoreBreakdown>,
        now_ms: u64,
        request_id: &str,
        attempt: u32,
        excluded: Vec<ExcludedCandidate>,
        recorder: &mut DecisionRecorder,
    ) -> Decision {
        let selected_key_id = chosen_index.map(|i| self.credentials[i].id.clone());
        if let Some(i) = chosen_index {
            self.credentials[i].acquire();
            self.credentials[i].state.lock().unwrap().last_used_ms = Some(now_ms);
        }
        Decision {
            sequence: recorder.next_sequence(),
            timestamp_ms: now_ms,
            request_id: request_id.to_string(),
            attempt,
            selected_key_id,
            selected_model_id: None,
            reason,
            score,
            pool_state: self.pool_state(now_ms),
            excluded,
        }
    }

    /// Recompute the process-wide pool state.
    #[must_use]
    pub fn pool_state(&self, now_ms: u64) -> PoolState {
        let n = self.credentials.len();
        if n == 0 {
            return PoolState::Critical;
        }
        let empty = HashSet::new();
        let available: Vec<usize> = self
            .credentials
            .iter()
            .filter(|c| exclusion_reason(c, &empty, &self.config, now_ms).is_none())
            .map(|c| c.index)
            .collect();
        let ratio = available.len() as f64 / n as f64;
        if available.is_empty() || ratio < 0.25 {
            return PoolState::Critical;
        }
        let avg_health = if available.is_empty() {
            0.0
        } else {
            let pool_avg_latency_ms = self.pool_average_latency_ms(&available);
            let total_selected: u64 = available
                .iter()
                .map(|&i| self.credentials[i].state.lock().unwrap().total_requests)
                .sum::<u64>()
                .max(1);
            let expected_share = 100.0 / available.len() as f64;
            let sum: f64 = available
                .iter()
                .map(|&i| {
                    let s = self.credentials[i].state.lock().unwrap();
                    let stats = CandidateStats {
                        p50_latency_ms: s.latency_samples.percentiles().map(|p| p.p50),
                        pool_avg_latency_ms,
                        is_slow_or_quarantined: s.quarantined,
                        success_rate: if s.total_requests > 0 {
                            Some(s.total_successes as f64 / s.total_requests as f64)
                        } else {
                            None
                        },
                        recent_failures_60s: s.recent_failures.len() as u32,
                        last_used_ms: s.last_used_ms,
                        in_flight: s.in_flight,
                        selection_share_percent: s.total_requests as f64 / total_selected as f64
                            * 100.0,
                        expected_share_percent: expected_share,
                        ms_since_last_use: s.last_used_ms.map(|t| now_ms.saturating_sub(t)),
                    };
                    drop(s);
                    strategies::health_score(
                        &stats,
                        &self.config.health_score_weights,
                        self.config.fairness_mode,
                        self.config.fairness_boost_factor,
                        self.config.starvation_threshold_ms,
                    )
                    .total
                })
                .sum();
            sum / available.len() as f64
        };
        if ratio < 0.5 || avg_health < 50.0 {
            PoolState::Degraded
        } else {
            PoolState::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(n: usize) -> Scheduler {
        let ids: Vec<String> = (0..n).map(|i| format!("key-{i}")).collect();
        Scheduler::new(PoolConfig::default(), ids, 0)
    }

    #[test]
    fn single_healthy_key_always_chosen() {
        let sched = scheduler(1);
        let mut rec = DecisionRecorder::new(100);
        for i in 0..5u64 {
            let d = sched.select_key(&HashSet::new(), i * 100, "req", 0, &mut rec);
            assert_eq!(d.selected_key_id.as_deref(), Some("key-0"));
            assert_eq!(d.reason, Reason::LastAvailable);
            sched.credential("key-0").unwrap().release();
        }
    }

    #[test]
    fn open_circuit_then_recovery() {
        let sched = scheduler(1);
        let mut rec = DecisionRecorder::new(100);
        let cred = sched.credential("key-0").unwrap();
        cred.record_failure(0);
        cred.record_failure(1_000);
        cred.record_failure(2_000);
        assert_eq!(cred.state.lock().unwrap().circuit.state_kind(), CircuitStateKind::Open);

        let d = sched.select_key(&HashSet::new(), 2_500, "req", 0, &mut rec);
        assert!(d.selected_key_id.is_none());

        let d = sched.select_key(&HashSet::new(), 63_000, "req", 0, &mut rec);
        assert_eq!(d.selected_key_id.as_deref(), Some("key-0"));
        assert_eq!(d.reason, Reason::CircuitRecovery);
    }

    #[test]
    fn all_at_max_concurrency_excludes_all() {
        let mut cfg = PoolConfig::default();
        cfg.max_concurrency_per_key = 1;
        let sched = Scheduler::new(cfg, vec!["a".into(), "b".into()], 0);
        sched.credential("a").unwrap().acquire();
        sched.credential("b").unwrap().acquire();
        let mut rec = DecisionRecorder::new(100);
        let d = sched.select_key(&HashSet::new(), 0, "req", 0, &mut rec);
        assert!(d.selected_key_id.is_none());
        assert_eq!(d.reason, Reason::ExcludedAtMaxConcurrency);
    }

    #[test]
    fn empty_pool_is_excluded_explicitly() {
        let sched = Scheduler::new(PoolConfig::default(), vec![], 0);
        let mut rec = DecisionRecorder::new(100);
        let d = sched.select_key(&HashSet::new(), 0, "req", 0, &mut rec);
        assert!(d.selected_key_id.is_none());
        assert_eq!(d.reason, Reason::ExcludedExplicitly);
    }

    #[test]
    fn explicit_exclusion_is_respected() {
        let sched = scheduler(1);
        let mut rec = DecisionRecorder::new(100);
        let mut excluded = HashSet::new();
        excluded.insert("key-0".to_string());
        let d = sched.select_key(&excluded, 0, "req", 0, &mut rec);
        assert!(d.selected_key_id.is_none());
        assert_eq!(d.reason, Reason::ExcludedExplicitly);
    }
}
