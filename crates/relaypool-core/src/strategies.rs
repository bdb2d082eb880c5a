//! Pure scoring and selection math used by the scheduler.
//!
//! Kept separate from [`crate::scheduler`] so the score formula and the
//! weighted/round-robin draw can be unit-tested without constructing a full
//! pool of credentials.

use crate::config::{FairnessMode, HealthScoreWeights};
use crate::decision::ScoreBreakdown;
use crate::reason::Reason;
use rand::Rng;

/// Inputs needed to score one candidate credential. All rates/durations are
/// pre-computed by the caller (the scheduler owns the credential locks).
#[derive(Debug, Clone, Copy)]
pub struct CandidateStats {
    pub p50_latency_ms: Option<u64>,
    pub pool_avg_latency_ms: Option<f64>,
    pub is_slow_or_quarantined: bool,
    pub success_rate: Option<f64>,
    pub recent_failures_60s: u32,
    pub last_used_ms: Option<u64>,
    pub in_flight: u32,
    pub selection_share_percent: f64,
    pub expected_share_percent: f64,
    pub ms_since_last_use: Option<u64>,
}

/// Compute the health score breakdown for one candidate at `now_ms`.
#[must_use]
pub fn health_score(
    stats: &CandidateStats,
    weights: &HealthScoreWeights,
    fairness_mode: FairnessMode,
    fairness_boost_factor: f64,
    starvation_threshold_ms: u64,
) -> ScoreBreakdown {
    let latency_score = latency_component(stats) * (weights.latency as f64 / 40.0);
    let success_score = success_component(stats) * (weights.success_rate as f64 / 40.0);
    let error_score = error_component(stats) * (weights.error_recency as f64 / 20.0);
    let fairness_boost = fairness_component(
        stats,
        fairness_mode,
        fairness_boost_factor,
        starvation_threshold_ms,
    );
    let recency_penalty = recency_component(stats);
    let in_flight_penalty = 15.0 * stats.in_flight as f64;

    let total = (latency_score + success_score + error_score + fairness_boost
        - recency_penalty
        - in_flight_penalty)
        .max(0.0);

    ScoreBreakdown {
        latency_score,
        success_score,
        error_score,
        fairness_boost,
        recency_penalty,
        in_flight_penalty,
        total,
    }
}

fn latency_component(stats: &CandidateStats) -> f64 {
    let (Some(p50), Some(avg)) = (stats.p50_latency_ms, stats.pool_avg_latency_ms) else {
        return 0.0;
    };
    if avg <= 0.0 {
        return 0.0;
    }
    let r = p50 as f64 / avg;
    let base = if r < 0.8 {
        40.0
    } else if r < 1.0 {
        35.0
    } else if r < 1.5 {
        20.0
    } else {
        5.0
    };
    if stats.is_slow_or_quarantined {
        (base - 20.0).max(0.0)
    } else {
        base
    }
}

fn success_component(stats: &CandidateStats) -> f64 {
    let rate = stats.success_rate.unwrap_or(1.0);
    (rate * 40.0).round()
}

fn error_component(stats: &CandidateStats) -> f64 {
    (20.0 - 5.0 * stats.recent_failures_60s as f64).max(0.0)
}

fn recency_component(stats: &CandidateStats) -> f64 {
    match stats.ms_since_last_use {
        None => 0.0,
        Some(ms) if ms < 500 => 30.0,
        Some(ms) if ms < 1_000 => 20.0,
        Some(ms) if ms < 2_000 => 10.0,
        Some(_) => 0.0,
    }
}

fn fairness_component(
    stats: &CandidateStats,
    mode: FairnessMode,
    factor: f64,
    starvation_threshold_ms: u64,
) -> f64 {
    if mode == FairnessMode::None {
        return 0.0;
    }
    let expected = stats.expected_share_percent;
    if expected <= 0.0 {
        return 0.0;
    }
    let actual = stats.selection_share_percent;
    if actual < 0.7 * expected {
        20.0 * factor
    } else if actual < 0.9 * expected {
        10.0 * factor
    } else if stats
        .ms_since_last_use
        .is_some_and(|ms| ms as u64 > starvation_threshold_ms)
    {
        25.0
    } else {
        0.0
    }
}

/// One scored candidate, keyed by credential id.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub key_id: String,
    pub breakdown: ScoreBreakdown,
}

/// Weighted-random pick among scored candidates, weight = `max(1,
/// score^2/100)`. Returns the chosen candidate's index into `candidates`
/// plus the reason that should be attached to the decision.
///
/// Falls back to the top-scored candidate if the weighted draw doesn't
/// resolve (a numeric edge case that should not occur with positive
/// weights, but is handled defensively since this is the scheduler's hot
/// path and must never panic).
pub fn weighted_select<R: Rng + ?Sized>(
    candidates: &[ScoredCandidate],
    rng: &mut R,
) -> Option<(usize, Reason)> {
    if candidates.is_empty() {
        return None;
    }
    let top_index = candidates
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.breakdown.total.total_cmp(&b.1.breakdown.total))
        .map(|(i, _)| i)?;

    let weights: Vec<f64> = candidates
        .iter()
        .map(|c| (c.breakdown.total * c.breakdown.total / 100.0).max(1.0))
        .collect();
    let total_weight: f64 = weights.iter().sum();
    let mut draw = rng.gen_range(0.0..total_weight);
    let mut chosen = top_index;
    for (i, w) in weights.iter().enumerate() {
        if draw < *w {
            chosen = i;
            break;
        }
        draw -= w;
    }

    let reason = if candidates[top_index].breakdown.fairness_boost > 0.0 {
        Reason::FairnessBoost
    } else if chosen == top_index {
        Reason::HealthScoreWinner
    } else {
        Reason::WeightedRandom
    };
    Some((chosen, reason))
}

/// Round-robin pick over a pool indexed by a monotonically increasing
/// counter. `counter` is advanced by the caller on every call.
#[must_use]
pub fn round_robin_select(pool_size: usize, counter: usize) -> Option<usize> {
    if pool_size == 0 {
        None
    } else {
        Some(counter % pool_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn stats() -> CandidateStats {
        CandidateStats {
            p50_latency_ms: None,
            pool_avg_latency_ms: None,
            is_slow_or_quarantined: false,
            success_rate: None,
            recent_failures_60s: 0,
            last_used_ms: None,
            in_flight: 0,
            selection_share_percent: 50.0,
            expected_share_percent: 50.0,
            ms_since_last_use: None,
        }
    }

    #[test]
    fn no_samples_gives_zero_latency_score() {
        let weights = HealthScoreWeights::default();
        let score = health_score(&stats(), &weights, FairnessMode::None, 1.5, 30_000);
        assert_eq!(score.latency_score, 0.0);
        assert_eq!(score.success_score, 40.0); // no requests => treated as 100% success
    }

    #[test]
    fn in_flight_penalty_scales_linearly() {
        let mut s = stats();
        s.in_flight = 2;
        let weights = HealthScoreWeights::default();
        let score = health_score(&s, &weights, FairnessMode::None, 1.5, 30_000);
        assert_eq!(score.in_flight_penalty, 30.0);
    }

    #[test]
    fn fairness_boost_applies_when_starved() {
        let mut s = stats();
        s.selection_share_percent = 10.0;
        s.expected_share_percent = 50.0;
        let weights = HealthScoreWeights::default();
        let score = health_score(&s, &weights, FairnessMode::Soft, 1.5, 30_000);
        assert_eq!(score.fairness_boost, 30.0); // 20 * 1.5
    }

    #[test]
    fn fairness_none_disables_boost() {
        let mut s = stats();
        s.selection_share_percent = 0.0;
        s.expected_share_percent = 50.0;
        let weights = HealthScoreWeights::default();
        let score = health_score(&s, &weights, FairnessMode::None, 1.5, 30_000);
        assert_eq!(score.fairness_boost, 0.0);
    }

    #[test]
    fn weighted_select_empty_is_none() {
        let mut rng = StepRng::new(0, 1);
        assert!(weighted_select(&[], &mut rng).is_none());
    }

    #[test]
    fn round_robin_wraps() {
        assert_eq!(round_robin_select(3, 0), Some(0));
        assert_eq!(round_robin_select(3, 3), Some(0));
        assert_eq!(round_robin_select(0, 0), None);
    }
}
