//! Bounded audit trail and fairness telemetry.
//!
//! Every selection round, successful or not, is recorded here. The recorder
//! keeps a fixed-capacity ring of decisions plus running counters used to
//! compute the fairness metric — it never grows unbounded regardless of how
//! long the pool runs.

use crate::decision::Decision;
use crate::reason::Reason;
use crate::ring_buffer::RingBuffer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aggregate counters and recent history, queryable without locking the
/// live scheduler state.
pub struct DecisionRecorder {
    decisions: RingBuffer<Decision>,
    next_sequence: u64,
    key_selection_counts: HashMap<String, u64>,
    key_opportunity_counts: HashMap<String, u64>,
    why_not_counts: HashMap<String, HashMap<Reason, u64>>,
    reason_counts: HashMap<Reason, u64>,
}

impl DecisionRecorder {
    #[must_use]
    pub fn new(max_decisions: usize) -> Self {
        Self {
            decisions: RingBuffer::new(max_decisions.max(1)),
            next_sequence: 0,
            key_selection_counts: HashMap::new(),
            key_opportunity_counts: HashMap::new(),
            why_not_counts: HashMap::new(),
            reason_counts: HashMap::new(),
        }
    }

    /// Next sequence number, for assigning monotonic order to decisions
    /// built by the scheduler/router before they're recorded.
    pub fn next_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    /// Record a completed decision (selection or exclusion).
    pub fn record(&mut self, decision: Decision) {
        *self.reason_counts.entry(decision.reason).or_insert(0) += 1;
        if let Some(key_id) = &decision.selected_key_id {
            *self.key_selection_counts.entry(key_id.clone()).or_insert(0) += 1;
        }
        for excluded in &decision.excluded {
            *self
                .why_not_counts
                .entry(excluded.key_id.clone())
                .or_default()
                .entry(excluded.reason)
                .or_insert(0) += 1;
        }
        self.decisions.push(decision);
    }

    /// Record that `key_id` was eligible for selection but not chosen.
    pub fn record_opportunity(&mut self, key_id: &str) {
        *self
            .key_opportunity_counts
            .entry(key_id.to_string())
            .or_insert(0) += 1;
    }

    #[must_use]
    pub fn recent_decisions(&self, n: usize) -> Vec<Decision> {
        let len = self.decisions.len();
        let skip = len.saturating_sub(n);
        self.decisions.iter().skip(skip).cloned().collect()
    }

    #[must_use]
    pub fn reason_distribution(&self) -> HashMap<Reason, u64> {
        self.reason_counts.clone()
    }

    #[must_use]
    pub fn why_not_stats(&self) -> HashMap<String, HashMap<Reason, u64>> {
        self.why_not_counts.clone()
    }

    #[must_use]
    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            total_decisions: self.decisions.total_pushed(),
            buffered_decisions: self.decisions.len(),
            key_selection_counts: self.key_selection_counts.clone(),
            key_opportunity_counts: self.key_opportunity_counts.clone(),
        }
    }

    /// Fairness metric: `100 - 2 * mean_absolute_deviation(shares)`, clamped
    /// to `[0, 100]`. `shares` are each key's selection share as a
    /// percentage of total selections.
    #[must_use]
    pub fn fairness_metrics(&self) -> FairnessMetrics {
        let total: u64 = self.key_selection_counts.values().sum();
        if total == 0 || self.key_selection_counts.is_empty() {
            return FairnessMetrics {
                fairness_score: 100.0,
                per_key_share: HashMap::new(),
            };
        }
        let n = self.key_selection_counts.len() as f64;
        let expected_share = 100.0 / n;
        let shares: HashMap<String, f64> = self
            .key_selection_counts
            .iter()
            .map(|(k, &count)| (k.clone(), count as f64 / total as f64 * 100.0))
            .collect();
        let mad = shares.values().map(|s| (s - expected_share).abs()).sum::<f64>() / n;
        let fairness_score = (100.0 - 2.0 * mad).clamp(0.0, 100.0);
        FairnessMetrics {
            fairness_score,
            per_key_share: shares,
        }
    }

    pub fn reset(&mut self) {
        self.decisions.clear();
        self.next_sequence = 0;
        self.key_selection_counts.clear();
        self.key_opportunity_counts.clear();
        self.why_not_counts.clear();
        self.reason_counts.clear();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderStats {
    pub total_decisions: u64,
    pub buffered_decisions: usize,
    pub key_selection_counts: HashMap<String, u64>,
    pub key_opportunity_counts: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairnessMetrics {
    pub fairness_score: f64,
    pub per_key_share: HashMap<String, f64>,
}
