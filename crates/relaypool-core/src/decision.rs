//! Selection decision records.
//!
//! A `Decision` is an immutable record of one selection or exclusion,
//! written by the scheduler and the model router into the decision
//! recorder. Once recorded it is never mutated; it is only evicted when the
//! bounded ring wraps.

use crate::reason::Reason;
use serde::{Deserialize, Serialize};

/// Breakdown of a credential's health score at selection time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub latency_score: f64,
    pub success_score: f64,
    pub error_score: f64,
    pub fairness_boost: f64,
    pub recency_penalty: f64,
    pub in_flight_penalty: f64,
    pub total: f64,
}

/// A candidate that was available but not selected, with its reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludedCandidate {
    pub key_id: String,
    pub reason: Reason,
}

/// The process-wide pool state, derived each selection round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PoolState {
    Healthy,
    Degraded,
    Critical,
}

/// An immutable record of one selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub request_id: String,
    pub attempt: u32,
    pub selected_key_id: Option<String>,
    pub selected_model_id: Option<String>,
    pub reason: Reason,
    pub score: Option<ScoreBreakdown>,
    pub pool_state: PoolState,
    pub excluded: Vec<ExcludedCandidate>,
}

/// Result of a scheduler selection round: either a chosen key or `None`
/// with a reason recorded in the decision's context. Always returned, even
/// on failure to select — the scheduler never panics or errors here.
#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    pub chosen_key_id: Option<String>,
    pub decision: Decision,
}
