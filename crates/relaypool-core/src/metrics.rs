//! In-process counter/gauge registry.
//!
//! No external metrics-exposition dependency, matching the teacher's own
//! telemetry module: a `RwLock<HashMap<..>>` of atomics, queryable directly
//! by tests and by the demo CLI without a running collector.

use crate::decision::PoolState;
use crate::reason::Reason;
use crate::ring_buffer::{Percentiles, RingBuffer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

/// Bucket width, in score points, for the health-score histogram.
const HEALTH_SCORE_BUCKET_WIDTH: u64 = 10;
/// Number of buckets covering the 0-100 score range.
const HEALTH_SCORE_BUCKET_COUNT: usize = 10;
/// Rolling sample window backing the health-score histogram/percentiles.
const HEALTH_SCORE_SAMPLE_CAPACITY: usize = 1_000;

/// Bounded-cardinality counters and gauges for the control plane.
pub struct PoolMetrics {
    selections_total: RwLock<HashMap<Reason, AtomicU64>>,
    opportunities_total: RwLock<HashMap<String, AtomicU64>>,
    exclusions_total: RwLock<HashMap<(String, Reason), AtomicU64>>,
    pool_state_gauge: RwLock<PoolState>,
    model_in_flight_gauge: RwLock<HashMap<String, AtomicU64>>,
    health_score_samples: Mutex<RingBuffer<u64>>,
}

impl Default for PoolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            selections_total: RwLock::new(HashMap::new()),
            opportunities_total: RwLock::new(HashMap::new()),
            exclusions_total: RwLock::new(HashMap::new()),
            pool_state_gauge: RwLock::new(PoolState::Healthy),
            model_in_flight_gauge: RwLock::new(HashMap::new()),
            health_score_samples: Mutex::new(RingBuffer::new(HEALTH_SCORE_SAMPLE_CAPACITY)),
        }
    }

    /// Record one computed health score (0-100) into the bucketed histogram.
    pub fn record_health_score(&self, score: f64) {
        let clamped = score.round().clamp(0.0, 100.0) as u64;
        self.health_score_samples.lock().unwrap().push(clamped);
    }

    /// Bucketed counts plus percentiles over the current sample window.
    #[must_use]
    pub fn health_score_histogram(&self) -> HealthScoreHistogram {
        let samples = self.health_score_samples.lock().unwrap();
        let mut buckets = vec![0u64; HEALTH_SCORE_BUCKET_COUNT];
        for &s in samples.iter() {
            let idx = ((s / HEALTH_SCORE_BUCKET_WIDTH) as usize).min(HEALTH_SCORE_BUCKET_COUNT - 1);
            buckets[idx] += 1;
        }
        HealthScoreHistogram {
            bucket_width: HEALTH_SCORE_BUCKET_WIDTH,
            buckets,
            percentiles: samples.percentiles(),
        }
    }

    pub fn record_selection(&self, reason: Reason) {
        let map = self.selections_total.read().unwrap();
        if let Some(counter) = map.get(&reason) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        drop(map);
        let mut map = self.selections_total.write().unwrap();
        map.entry(reason)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_opportunity(&self, key_id: &str) {
        let map = self.opportunities_total.read().unwrap();
        if let Some(counter) = map.get(key_id) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        drop(map);
        let mut map = self.opportunities_total.write().unwrap();
        map.entry(key_id.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exclusion(&self, key_id: &str, reason: Reason) {
        let entry_key = (key_id.to_string(), reason);
        let map = self.exclusions_total.read().unwrap();
        if let Some(counter) = map.get(&entry_key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        drop(map);
        let mut map = self.exclusions_total.write().unwrap();
        map.entry(entry_key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_pool_state(&self, state: PoolState) {
        *self.pool_state_gauge.write().unwrap() = state;
    }

    pub fn set_model_in_flight(&self, model_id: &str, value: u64) {
        let map = self.model_in_flight_gauge.read().unwrap();
        if let Some(g) = map.get(model_id) {
            g.store(value, Ordering::Relaxed);
            return;
        }
        drop(map);
        self.model_in_flight_gauge
            .write()
            .unwrap()
            .entry(model_id.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(value, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let selections_total = self
            .selections_total
            .read()
            .unwrap()
            .iter()
            .map(|(r, c)| (r.to_string(), c.load(Ordering::Relaxed)))
            .collect();
        let opportunities_total = self
            .opportunities_total
            .read()
            .unwrap()
            .iter()
            .map(|(k, c)| (k.clone(), c.load(Ordering::Relaxed)))
            .collect();
        let exclusions_total = self
            .exclusions_total
            .read()
            .unwrap()
            .iter()
            .map(|((k, r), c)| (format!("{k}:{r}"), c.load(Ordering::Relaxed)))
            .collect();
        let model_in_flight = self
            .model_in_flight_gauge
            .read()
            .unwrap()
            .iter()
            .map(|(k, c)| (k.clone(), c.load(Ordering::Relaxed)))
            .collect();
        MetricsSnapshot {
            selections_total,
            opportunities_total,
            exclusions_total,
            pool_state: *self.pool_state_gauge.read().unwrap(),
            model_in_flight,
            health_score_histogram: self.health_score_histogram(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub selections_total: HashMap<String, u64>,
    pub opportunities_total: HashMap<String, u64>,
    pub exclusions_total: HashMap<String, u64>,
    pub pool_state: PoolState,
    pub model_in_flight: HashMap<String, u64>,
    pub health_score_histogram: HealthScoreHistogram,
}

/// Bucketed health-score counts (width `bucket_width`, starting at 0) plus
/// the ring buffer's own p50/p95/p99 over the same sample window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthScoreHistogram {
    pub bucket_width: u64,
    pub buckets: Vec<u64>,
    pub percentiles: Option<Percentiles>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = PoolMetrics::new();
        m.record_selection(Reason::HealthScoreWinner);
        m.record_selection(Reason::HealthScoreWinner);
        m.record_opportunity("a");
        let snap = m.snapshot();
        assert_eq!(snap.selections_total["health_score_winner"], 2);
        assert_eq!(snap.opportunities_total["a"], 1);
    }

    #[test]
    fn pool_state_gauge_reflects_last_set() {
        let m = PoolMetrics::new();
        m.set_pool_state(PoolState::Degraded);
        assert_eq!(m.snapshot().pool_state, PoolState::Degraded);
    }

    #[test]
    fn health_score_histogram_buckets_samples() {
        let m = PoolMetrics::new();
        for score in [5.0, 12.0, 87.0, 100.0, 100.0] {
            m.record_health_score(score);
        }
        let hist = m.health_score_histogram();
        assert_eq!(hist.bucket_width, 10);
        assert_eq!(hist.buckets.len(), 10);
        assert_eq!(hist.buckets[0], 1); // 5
        assert_eq!(hist.buckets[1], 1); // 12
        assert_eq!(hist.buckets[8], 1); // 87
        assert_eq!(hist.buckets[9], 2); // 100, 100 folded into last bucket
    }

    #[test]
    fn health_score_histogram_empty_has_no_percentiles() {
        let m = PoolMetrics::new();
        assert!(m.health_score_histogram().percentiles.is_none());
    }
}
