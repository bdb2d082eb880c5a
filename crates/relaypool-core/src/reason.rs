//! The closed reason-code enum.
//!
//! Reason codes appear in telemetry labels and snapshot payloads, so the
//! enum is treated as a versioned public contract: additions are fine,
//! removals require a snapshot schema major bump. Unknown values
//! deserialized from outside the process coerce to [`Reason::Unknown`] to
//! keep label cardinality bounded.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a credential was selected, or why it was excluded from selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    HealthScoreWinner,
    RoundRobinTurn,
    LastAvailable,
    WeightedRandom,
    CircuitRecovery,
    RateLimitRotated,
    SlowKeyAvoided,
    ForcedFallback,
    LeastLoaded,
    FairnessBoost,
    ExcludedCircuitOpen,
    ExcludedRateLimited,
    ExcludedAtMaxConcurrency,
    ExcludedSlowQuarantine,
    ExcludedExplicitly,
    ExcludedTokenExhausted,
    /// Coercion sentinel for any value outside the closed set above.
    #[serde(other)]
    Unknown,
}

impl Reason {
    /// Whether this reason describes a successful selection (as opposed to
    /// an exclusion).
    #[must_use]
    pub fn is_selection(self) -> bool {
        !matches!(
            self,
            Reason::ExcludedCircuitOpen
                | Reason::ExcludedRateLimited
                | Reason::ExcludedAtMaxConcurrency
                | Reason::ExcludedSlowQuarantine
                | Reason::ExcludedExplicitly
                | Reason::ExcludedTokenExhausted
        )
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reason::HealthScoreWinner => "health_score_winner",
            Reason::RoundRobinTurn => "round_robin_turn",
            Reason::LastAvailable => "last_available",
            Reason::WeightedRandom => "weighted_random",
            Reason::CircuitRecovery => "circuit_recovery",
            Reason::RateLimitRotated => "rate_limit_rotated",
            Reason::SlowKeyAvoided => "slow_key_avoided",
            Reason::ForcedFallback => "forced_fallback",
            Reason::LeastLoaded => "least_loaded",
            Reason::FairnessBoost => "fairness_boost",
            Reason::ExcludedCircuitOpen => "excluded_circuit_open",
            Reason::ExcludedRateLimited => "excluded_rate_limited",
            Reason::ExcludedAtMaxConcurrency => "excluded_at_max_concurrency",
            Reason::ExcludedSlowQuarantine => "excluded_slow_quarantine",
            Reason::ExcludedExplicitly => "excluded_explicitly",
            Reason::ExcludedTokenExhausted => "excluded_token_exhausted",
            Reason::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_value_coerces_on_deserialize() {
        let parsed: Reason = serde_json::from_str("\"something_new\"").unwrap();
        assert_eq!(parsed, Reason::Unknown);
    }

    #[test]
    fn known_value_round_trips() {
        let json = serde_json::to_string(&Reason::HealthScoreWinner).unwrap();
        let parsed: Reason = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Reason::HealthScoreWinner);
    }

    #[test]
    fn is_selection_classifies_exclusions() {
        assert!(Reason::HealthScoreWinner.is_selection());
        assert!(!Reason::ExcludedCircuitOpen.is_selection());
    }
}
