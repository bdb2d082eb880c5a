//! `Pool`: the top-level control plane tying together the scheduler, model
//! router, pool cooldown, decision recorder, and metrics.
//!
//! This is the single entry point a dispatcher talks to: `select_key`,
//! `select_model`, `record_outcome`, `release`, and the snapshot/explain
//! surface. The background health-score refresh task is spawned on
//! `Pool::spawn`, and every timer is cancelled by `destroy()` so the
//! process can shut down cleanly.

use crate::collaborators::CallOutcome;
use crate::config::PoolConfig;
use crate::decision::Decision;
use crate::decision_recorder::{DecisionRecorder, FairnessMetrics};
#[cfg(feature = "metrics")]
use crate::metrics::{MetricsSnapshot, PoolMetrics};
use crate::model_router::{ModelRouter, RequestFeatures, RouteInfo, Tier};
use crate::pool_cooldown::{PoolCooldown, PoolCooldownStatus};
use crate::scheduler::Scheduler;
use crate::snapshot::{self, KeySnapshot, PoolSnapshot};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The credential and model pool control plane.
pub struct Pool {
    config: PoolConfig,
    scheduler: Scheduler,
    model_router: ModelRouter,
    pool_cooldown: PoolCooldown,
    recorder: Mutex<DecisionRecorder>,
    #[cfg(feature = "metrics")]
    metrics: PoolMetrics,
    refresh_handle: Mutex<Option<JoinHandle<()>>>,
}

/// What the dispatcher got back for one request: the chosen credential and
/// model (if any), and the decision that was recorded for it.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub credential_id: Option<String>,
    pub model_route: Option<RouteInfo>,
    pub model_id: Option<String>,
    pub decision: Decision,
}

impl Pool {
    #[must_use]
    pub fn new(
        config: PoolConfig,
        credential_ids: Vec<String>,
        max_concurrency_per_model: u32,
        now_ms: u64,
    ) -> Self {
        let recorder = DecisionRecorder::new(config.max_decisions);
        Self {
            scheduler: Scheduler::new(config.clone(), credential_ids, now_ms),
            model_router: ModelRouter::new(config.clone(), max_concurrency_per_model),
            pool_cooldown: PoolCooldown::new(config.pool_cooldown),
            recorder: Mutex::new(recorder),
            #[cfg(feature = "metrics")]
            metrics: PoolMetrics::new(),
            config,
            refresh_handle: Mutex::new(None),
        }
    }

    /// Spawn the background health-score refresh task onto the current
    /// Tokio runtime. Requires `self` behind an `Arc` so the task can
    /// outlive the caller's stack frame; call [`Pool::destroy`] to stop it.
    pub fn spawn_refresh_task(self: &std::sync::Arc<Self>, clock: impl Fn() -> u64 + Send + 'static) {
        let pool = std::sync::Arc::clone(self);
        let ttl = Duration::from_millis(self.config.score_cache_ttl_ms.max(1));
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(500));
            loop {
                interval.tick().await;
                pool.scheduler.refresh_score_cache(clock());
                let _ = ttl; // ttl is read by the scheduler itself on lookup
            }
        });
        *self.refresh_handle.lock().unwrap() = Some(handle);
    }

    /// Stop all background timers so the process can shut down cleanly.
    pub fn destroy(&self) {
        if let Some(handle) = self.refresh_handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Select a credential and a model for one request.
    pub fn dispatch(
        &self,
        excluded_ids: &HashSet<String>,
        features: RequestFeatures,
        tier_hint: Option<Tier>,
        now_ms: u64,
        request_id: &str,
        attempt: u32,
    ) -> DispatchPlan {
        let mut recorder = self.recorder.lock().unwrap();
        let decision = self
            .scheduler
            .select_key(excluded_ids, now_ms, request_id, attempt, &mut recorder);
        #[cfg(feature = "metrics")]
        {
            self.metrics.record_selection(decision.reason);
            for excluded in &decision.excluded {
                self.metrics.record_exclusion(&excluded.key_id, excluded.reason);
            }
            self.metrics.set_pool_state(decision.pool_state);
            if let Some(score) = &decision.score {
                self.metrics.record_health_score(score.total);
            }
        }
        drop(recorder);

        let model_route = if decision.selected_key_id.is_some() {
            self.model_router.select_model(features, tier_hint, now_ms)
        } else {
            None
        };
        let model_id = model_route.as_ref().map(|r| r.model_id.clone());

        DispatchPlan {
            credential_id: decision.selected_key_id.clone(),
            model_route,
            model_id,
            decision,
        }
    }

    /// Report the outcome of an upstream call.
    pub fn record_outcome(
        &self,
        credential_id: &str,
        model_id: Option<&str>,
        outcome: CallOutcome,
        now_ms: u64,
    ) {
        if let Some(cred) = self.scheduler.credential(credential_id) {
            match outcome {
                CallOutcome::Success { latency_ms } => cred.record_success(now_ms, latency_ms),
                CallOutcome::TransientError => cred.record_failure(now_ms),
                CallOutcome::RateLimited => {
                    cred.record_rate_limited(now_ms);
                    self.pool_cooldown.record_429(credential_id, now_ms);
                }
                CallOutcome::Cancelled => {}
            }
            cred.release();
        }
        if let Some(model_id) = model_id {
            match outcome {
                CallOutcome::Success { .. } => {
                    self.model_router.record_model_outcome_success(model_id, now_ms);
                }
                CallOutcome::TransientError => {
                    self.model_router.record_model_cooldown(model_id, now_ms, 0);
                }
                CallOutcome::RateLimited => {
                    self.model_router.record_pool_429(model_id, now_ms);
                }
                CallOutcome::Cancelled => {}
            }
            self.model_router.release(model_id);
        }
    }

    #[must_use]
    pub fn pool_cooldown_status(&self, now_ms: u64) -> PoolCooldownStatus {
        self.pool_cooldown.status(now_ms)
    }

    #[must_use]
    pub fn fairness_metrics(&self) -> FairnessMetrics {
        self.recorder.lock().unwrap().fairness_metrics()
    }

    #[must_use]
    pub fn recent_decisions(&self, n: usize) -> Vec<Decision> {
        self.recorder.lock().unwrap().recent_decisions(n)
    }

    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn all_key_snapshots(&self, now_ms: u64) -> Vec<KeySnapshot> {
        snapshot::all_key_snapshots(&self.scheduler, &self.config, now_ms)
    }

    #[must_use]
    pub fn pool_snapshot(&self, now_ms: u64) -> PoolSnapshot {
        snapshot::pool_snapshot_all(&self.model_router, now_ms)
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn model_router(&self) -> &ModelRouter {
        &self.model_router
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_and_record_outcome_round_trip() {
        let config = PoolConfig::default();
        let pool = Pool::new(config, vec!["a".into(), "b".into()], 2, 0);
        let plan = pool.dispatch(&HashSet::new(), RequestFeatures::default(), None, 0, "req-1", 0);
        assert!(plan.credential_id.is_some());
        pool.record_outcome(
            plan.credential_id.as_deref().unwrap(),
            None,
            CallOutcome::Success { latency_ms: 42 },
            10,
        );
        assert_eq!(pool.scheduler.credential(plan.credential_id.as_deref().unwrap()).unwrap().in_flight(), 0);
    }

    #[test]
    fn destroy_is_a_no_op_without_a_spawned_task() {
        let pool = Pool::new(PoolConfig::default(), vec!["a".into()], 1, 0);
        pool.destroy();
    }
}
