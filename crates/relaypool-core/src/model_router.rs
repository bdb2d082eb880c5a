//! Model router and model pool.
//!
//! Selects a model from a tier (light/medium/heavy) with per-model
//! cooldowns, bounded concurrency, tier downgrade on exhaustion, and a
//! decaying pool-429 penalty that feeds the `pool` strategy. Also supports
//! a GLM-5-style staged rollout preference with shadow-mode counters.

use crate::config::{ModelCooldownConfig, PoolConfig, TierStrategy};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Light,
    Medium,
    Heavy,
}

impl Tier {
    fn downgrade(self) -> Option<Tier> {
        match self {
            Tier::Heavy => Some(Tier::Medium),
            Tier::Medium => Some(Tier::Light),
            Tier::Light => None,
        }
    }
}

struct ModelState {
    max_concurrency: u32,
    in_flight: AtomicU32,
    cooldown: Mutex<CooldownState>,
    pool_penalty: Mutex<PoolPenaltyState>,
}

struct CooldownState {
    until_ms: u64,
    consecutive_failures: u32,
    decay_started_ms: Option<u64>,
}

struct PoolPenaltyState {
    hits: f64,
    last_hit_ms: Option<u64>,
}

/// A single model entry in the pool.
pub struct ModelEntry {
    pub id: String,
    pub tier: Tier,
    state: ModelState,
}

impl ModelEntry {
    fn new(id: impl Into<String>, tier: Tier, max_concurrency: u32) -> Self {
        Self {
            id: id.into(),
            tier,
            state: ModelState {
                max_concurrency,
                in_flight: AtomicU32::new(0),
                cooldown: Mutex::new(CooldownState {
                    until_ms: 0,
                    consecutive_failures: 0,
                    decay_started_ms: None,
                }),
                pool_penalty: Mutex::new(PoolPenaltyState {
                    hits: 0.0,
                    last_hit_ms: None,
                }),
            },
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.state.in_flight.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn max_concurrency(&self) -> u32 {
        self.state.max_concurrency
    }

    #[must_use]
    pub fn cooldown_until_ms(&self, now_ms: u64) -> Option<u64> {
        let until = self.state.cooldown.lock().unwrap().until_ms;
        if until > now_ms {
            Some(until)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_available(&self, now_ms: u64) -> bool {
        let cd = self.state.cooldown.lock().unwrap();
        now_ms >= cd.until_ms && self.in_flight() < self.state.max_concurrency
    }

    /// Decaying pool-429 penalty, linearly decayed to zero over
    /// `decay_window_ms` since the last hit (see DESIGN.md open question #2).
    fn pool_penalty(&self, now_ms: u64, decay_window_ms: u64) -> f64 {
        let p = self.state.pool_penalty.lock().unwrap();
        match p.last_hit_ms {
            None => 0.0,
            Some(last) => {
                let elapsed = now_ms.saturating_sub(last) as f64;
                let window = decay_window_ms as f64;
                (p.hits * (1.0 - (elapsed / window).min(1.0))).max(0.0)
            }
        }
    }
}

/// Route information returned alongside a model selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteInfo {
    pub model_id: String,
    pub tier: Tier,
    pub requested_tier: Tier,
    pub downgraded: bool,
    pub strategy: TierStrategy,
    pub glm5_applied: bool,
}

/// Tier hint / request features used to decide the initial tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestFeatures {
    pub needs_tools: bool,
}

/// The model router and pool.
pub struct ModelRouter {
    config: PoolConfig,
    models: Vec<ModelEntry>,
    glm5_eligible: AtomicU32,
    glm5_applied: AtomicU32,
    glm5_shadow_preferred: AtomicU32,
}

impl ModelRouter {
    #[must_use]
    pub fn new(config: PoolConfig, max_concurrency_per_model: u32) -> Self {
        let mut models = Vec::new();
        for m in &config.tiers.light.models {
            models.push(ModelEntry::new(m.clone(), Tier::Light, max_concurrency_per_model));
        }
        for m in &config.tiers.medium.models {
            models.push(ModelEntry::new(m.clone(), Tier::Medium, max_concurrency_per_model));
        }
        for m in &config.tiers.heavy.models {
            models.push(ModelEntry::new(m.clone(), Tier::Heavy, max_concurrency_per_model));
        }
        Self {
            config,
            models,
            glm5_eligible: AtomicU32::new(0),
            glm5_applied: AtomicU32::new(0),
            glm5_shadow_preferred: AtomicU32::new(0),
        }
    }

    fn tier_strategy(&self, tier: Tier) -> TierStrategy {
        match tier {
            Tier::Light => self.config.tiers.light.strategy,
            Tier::Medium => self.config.tiers.medium.strategy,
            Tier::Heavy => self.config.tiers.heavy.strategy,
        }
    }

    fn models_in_tier(&self, tier: Tier) -> Vec<&ModelEntry> {
        self.models.iter().filter(|m| m.tier == tier).collect()
    }

    fn determine_tier(&self, features: RequestFeatures, tier_hint: Option<Tier>) -> Tier {
        if features.needs_tools {
            return Tier::Heavy;
        }
        tier_hint.unwrap_or(Tier::Medium)
    }

    /// Select a model, downgrading tiers on exhaustion. Reserves the slot
    /// (`in_flight += 1`) on success; callers must call [`Self::release`].
    pub fn select_model(
        &self,
        features: RequestFeatures,
        tier_hint: Option<Tier>,
        now_ms: u64,
    ) -> Option<RouteInfo> {
        let requested_tier = self.determine_tier(features, tier_hint);
        let mut tier = requested_tier;
        let mut downgraded = false;

        loop {
            let candidates: Vec<&ModelEntry> = self
                .models_in_tier(tier)
                .into_iter()
                .filter(|m| m.is_available(now_ms))
                .collect();

            if !candidates.is_empty() {
                let glm5_applied = tier == Tier::Heavy && self.config.glm5.enabled;
                if tier == Tier::Heavy && self.config.glm5.enabled {
                    self.glm5_eligible.fetch_add(1, Ordering::Relaxed);
                }
                let chosen = self.pick_within_tier(&candidates, tier, now_ms);
                chosen.state.in_flight.fetch_add(1, Ordering::Relaxed);
                return Some(RouteInfo {
                    model_id: chosen.id.clone(),
                    tier,
                    requested_tier,
                    downgraded,
                    strategy: self.tier_strategy(tier),
                    glm5_applied: glm5_applied && chosen.id == self.preferred_model().unwrap_or_default(),
                });
            }

            match tier.downgrade() {
                Some(next) => {
                    tier = next;
                    downgraded = true;
                }
                None => return None,
            }
        }
    }

    fn preferred_model(&self) -> Option<String> {
        self.config.glm5.preferred_model.clone()
    }

    fn pick_within_tier<'a>(
        &self,
        candidates: &[&'a ModelEntry],
        tier: Tier,
        now_ms: u64,
    ) -> &'a ModelEntry {
        // Staged GLM-5 rollout: heavy tier only. Count eligibility/shadow
        // regardless of whether the preference is actually applied.
        if tier == Tier::Heavy {
            if let Some(preferred_id) = &self.config.glm5.preferred_model {
                if let Some(preferred) = candidates.iter().find(|m| &m.id == preferred_id) {
                    let mut rng = rand::thread_rng();
                    let roll: f64 = rng.gen_range(0.0..1.0);
                    if self.config.glm5.enabled && roll < self.config.glm5.preference_percent {
                        self.glm5_applied.fetch_add(1, Ordering::Relaxed);
                        return preferred;
                    }
                    // shadow mode: would have preferred it, but didn't apply.
                    self.glm5_shadow_preferred.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        match self.tier_strategy(tier) {
            TierStrategy::Throughput => candidates
                .iter()
                .max_by_key(|m| m.state.max_concurrency - m.in_flight())
                .copied()
                .unwrap_or(candidates[0]),
            TierStrategy::Quality => candidates[0],
            TierStrategy::Balanced => {
                let mut rng = rand::thread_rng();
                candidates[rng.gen_range(0..candidates.len())]
            }
            TierStrategy::Pool => {
                let decay_ms = self.config.pool_429_penalty_window_ms;
                let weights: Vec<f64> = candidates
                    .iter()
                    .map(|m| 1.0 / (1.0 + m.pool_penalty(now_ms, decay_ms)))
                    .collect();
                let total: f64 = weights.iter().sum();
                let mut rng = rand::thread_rng();
                let mut draw = rng.gen_range(0.0..total);
                for (i, w) in weights.iter().enumerate() {
                    if draw < *w {
                        return candidates[i];
                    }
                    draw -= w;
                }
                candidates[candidates.len() - 1]
            }
        }
    }

    pub fn release(&self, model_id: &str) {
        if let Some(m) = self.models.iter().find(|m| m.id == model_id) {
            let current = m.state.in_flight.load(Ordering::Relaxed);
            if current > 0 {
                m.state.in_flight.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Record an upstream failure/429 against `model_id`: sets an
    /// exponential-backoff cooldown (`min(max, base * 2^failures) ± jitter`).
    pub fn record_model_cooldown(&self, model_id: &str, now_ms: u64, jitter_ms: i64) {
        let Some(m) = self.models.iter().find(|m| m.id == model_id) else {
            return;
        };
        let cfg = self.cooldown_config();
        let mut cd = m.state.cooldown.lock().unwrap();
        cd.consecutive_failures = cd.consecutive_failures.saturating_add(1);
        let base = cfg
            .default_ms
            .saturating_mul(1u64 << cd.consecutive_failures.min(20));
        let duration = base.min(cfg.max_ms);
        let jittered = (duration as i64 + jitter_ms).max(0) as u64;
        cd.until_ms = now_ms + jittered;
        cd.decay_started_ms = None;
    }

    /// Record an upstream 429 attributable to the pool, not a specific
    /// model's own health: bumps the model's decaying pool-429 penalty.
    pub fn record_pool_429(&self, model_id: &str, now_ms: u64) {
        if let Some(m) = self.models.iter().find(|m| m.id == model_id) {
            let mut p = m.state.pool_penalty.lock().unwrap();
            let decay_ms = self.config.pool_429_penalty_window_ms;
            let decayed = match p.last_hit_ms {
                Some(last) => {
                    let elapsed = now_ms.saturating_sub(last) as f64;
                    (p.hits * (1.0 - (elapsed / decay_ms as f64).min(1.0))).max(0.0)
                }
                None => 0.0,
            };
            p.hits = decayed + 1.0;
            p.last_hit_ms = Some(now_ms);
        }
    }

    /// Record a successful call: decays the cooldown streak after
    /// `cooldown.decay_ms` of continuous success.
    pub fn record_model_outcome_success(&self, model_id: &str, now_ms: u64) {
        let Some(m) = self.models.iter().find(|m| m.id == model_id) else {
            return;
        };
        let cfg = self.cooldown_config();
        let mut cd = m.state.cooldown.lock().unwrap();
        match cd.decay_started_ms {
            None => cd.decay_started_ms = Some(now_ms),
            Some(started) => {
                if now_ms.saturating_sub(started) >= cfg.decay_ms {
                    cd.consecutive_failures = 0;
                    cd.decay_started_ms = None;
                }
            }
        }
    }

    fn cooldown_config(&self) -> ModelCooldownConfig {
        self.config.model_cooldown
    }

    #[must_use]
    pub fn glm5_counters(&self) -> (u32, u32, u32) {
        (
            self.glm5_eligible.load(Ordering::Relaxed),
            self.glm5_applied.load(Ordering::Relaxed),
            self.glm5_shadow_preferred.load(Ordering::Relaxed),
        )
    }

    #[must_use]
    pub fn model(&self, id: &str) -> Option<&ModelEntry> {
        self.models.iter().find(|m| m.id == id)
    }

    #[must_use]
    pub fn models(&self) -> &[ModelEntry] {
        &self.models
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelPoolStats {
    pub counts_per_tier: HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TierConfig, TiersConfig};

    fn router() -> ModelRouter {
        let mut cfg = PoolConfig::default();
        cfg.tiers = TiersConfig {
            light: TierConfig {
                models: vec!["light-1".into()],
                strategy: TierStrategy::Throughput,
            },
            medium: TierConfig {
                models: vec!["medium-1".into()],
                strategy: TierStrategy::Balanced,
            },
            heavy: TierConfig {
                models: vec!["heavy-1".into()],
                strategy: TierStrategy::Quality,
            },
        };
        ModelRouter::new(cfg, 2)
    }

    #[test]
    fn selects_requested_tier_when_available() {
        let r = router();
        let route = r
            .select_model(RequestFeatures::default(), Some(Tier::Medium), 0)
            .unwrap();
        assert_eq!(route.tier, Tier::Medium);
        assert!(!route.downgraded);
    }

    #[test]
    fn needs_tools_forces_heavy_tier() {
        let r = router();
        let route = r
            .select_model(RequestFeatures { needs_tools: true }, Some(Tier::Light), 0)
            .unwrap();
        assert_eq!(route.requested_tier, Tier::Heavy);
    }

    #[test]
    fn downgrades_when_tier_exhausted() {
        let r = router();
        // exhaust the only heavy model's concurrency
        r.select_model(RequestFeatures { needs_tools: true }, None, 0);
        r.select_model(RequestFeatures { needs_tools: true }, None, 0);
        let route = r
            .select_model(RequestFeatures { needs_tools: true }, None, 0)
            .unwrap();
        assert!(route.downgraded);
        assert_eq!(route.tier, Tier::Medium);
    }

    #[test]
    fn cooldown_excludes_model_until_expiry() {
        let r = router();
        r.record_model_cooldown("medium-1", 0, 0);
        let route = r.select_model(RequestFeatures::default(), Some(Tier::Medium), 100);
        assert!(route.is_none() || route.unwrap().downgraded);
    }

    #[test]
    fn release_frees_concurrency_slot() {
        let r = router();
        r.select_model(RequestFeatures::default(), Some(Tier::Light), 0);
        r.select_model(RequestFeatures::default(), Some(Tier::Light), 0);
        assert_eq!(r.model("light-1").unwrap().in_flight(), 2);
        r.release("light-1");
        assert_eq!(r.model("light-1").unwrap().in_flight(), 1);
    }

    #[test]
    fn pool_429_penalty_decays_to_zero_over_window() {
        let r = router();
        r.record_pool_429("medium-1", 0);
        let m = r.model("medium-1").unwrap();
        let window = r.config.pool_429_penalty_window_ms;
        assert!(m.pool_penalty(0, window) > 0.0);
        assert_eq!(m.pool_penalty(window, window), 0.0);
    }

    #[test]
    fn pool_429_penalty_window_defaults_to_120s_and_is_independent_of_pool_cooldown_decay() {
        let r = router();
        assert_eq!(r.config.pool_429_penalty_window_ms, 120_000);
        assert_ne!(
            r.config.pool_429_penalty_window_ms,
            r.config.pool_cooldown.decay_ms
        );
    }
}
