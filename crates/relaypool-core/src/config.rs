//! Control-plane configuration.
//!
//! `PoolConfig` is a flat, serde-derived struct with one field (or nested
//! group) per configuration key. `PoolConfig::default()` reproduces every
//! default; `validate` rejects out-of-range values rather than silently
//! clamping them, matching the configuration-failure kind in the error
//! handling design.

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FairnessMode {
    None,
    Soft,
    Strict,
}

impl Default for FairnessMode {
    fn default() -> Self {
        Self::Soft
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthScoreWeights {
    pub latency: u32,
    pub success_rate: u32,
    pub error_recency: u32,
}

impl Default for HealthScoreWeights {
    fn default() -> Self {
        Self {
            latency: 40,
            success_rate: 40,
            error_recency: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolCooldownConfig {
    pub sleep_threshold_ms: u64,
    pub retry_jitter_ms: u64,
    pub max_cooldown_ms: u64,
    pub base_ms: u64,
    pub cap_ms: u64,
    pub decay_ms: u64,
}

impl Default for PoolCooldownConfig {
    fn default() -> Self {
        Self {
            sleep_threshold_ms: 250,
            retry_jitter_ms: 200,
            max_cooldown_ms: 5_000,
            base_ms: 500,
            cap_ms: 5_000,
            decay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierStrategy {
    Throughput,
    Quality,
    Balanced,
    Pool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub models: Vec<String>,
    pub strategy: TierStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TiersConfig {
    pub light: TierConfig,
    pub medium: TierConfig,
    pub heavy: TierConfig,
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            light: TierConfig {
                models: vec!["light-model".to_string()],
                strategy: TierStrategy::Throughput,
            },
            medium: TierConfig {
                models: vec!["medium-model".to_string()],
                strategy: TierStrategy::Balanced,
            },
            heavy: TierConfig {
                models: vec!["heavy-model".to_string()],
                strategy: TierStrategy::Quality,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCooldownConfig {
    pub default_ms: u64,
    pub max_ms: u64,
    pub decay_ms: u64,
}

impl Default for ModelCooldownConfig {
    fn default() -> Self {
        Self {
            default_ms: 5_000,
            max_ms: 30_000,
            decay_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Glm5Config {
    pub enabled: bool,
    pub preference_percent: f64,
    pub preferred_model: Option<String>,
}

impl Default for Glm5Config {
    fn default() -> Self {
        Self {
            enabled: false,
            preference_percent: 0.0,
            preferred_model: None,
        }
    }
}

/// Top-level control-plane configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_concurrency_per_key: u32,
    pub circuit_breaker: CircuitBreakerConfig,
    pub use_weighted_selection: bool,
    pub health_score_weights: HealthScoreWeights,
    pub slow_key_threshold: f64,
    pub slow_key_quarantine_duration_ms: u64,
    pub quarantine_probe_interval_ms: u64,
    pub fairness_mode: FairnessMode,
    pub fairness_boost_factor: f64,
    pub starvation_threshold_ms: u64,
    pub min_fairness_share: f64,
    pub rate_limit_per_minute: f64,
    pub pool_cooldown: PoolCooldownConfig,
    pub tiers: TiersConfig,
    pub model_cooldown: ModelCooldownConfig,
    pub glm5: Glm5Config,
    pub max_decisions: usize,
    pub score_cache_ttl_ms: u64,
    /// Window over which a model's decaying pool-429 penalty (separate from
    /// its own per-model cooldown) returns linearly to zero. Default 120s.
    pub pool_429_penalty_window_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency_per_key: 3,
            circuit_breaker: CircuitBreakerConfig::default(),
            use_weighted_selection: true,
            health_score_weights: HealthScoreWeights::default(),
            slow_key_threshold: 2.0,
            slow_key_quarantine_duration_ms: 60_000,
            quarantine_probe_interval_ms: 10_000,
            fairness_mode: FairnessMode::Soft,
            fairness_boost_factor: 1.5,
            starvation_threshold_ms: 30_000,
            min_fairness_share: 0.10,
            rate_limit_per_minute: 1_000.0,
            pool_cooldown: PoolCooldownConfig::default(),
            tiers: TiersConfig::default(),
            model_cooldown: ModelCooldownConfig::default(),
            glm5: Glm5Config::default(),
            max_decisions: 1_000,
            score_cache_ttl_ms: 1_000,
            pool_429_penalty_window_ms: 120_000,
        }
    }
}

impl PoolConfig {
    /// Parse from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse from a YAML string.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and parse from a TOML file on disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Reject configurations that would make the control plane misbehave
    /// rather than silently clamp them.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency_per_key < 1 {
            return Err(Error::Config(
                "max_concurrency_per_key must be >= 1".to_string(),
            ));
        }
        if self.circuit_breaker.failure_threshold < 1 {
            return Err(Error::Config(
                "circuit_breaker.failure_threshold must be >= 1".to_string(),
            ));
        }
        if self.fairness_boost_factor < 0.0 {
            return Err(Error::Config(
                "fairness_boost_factor must be >= 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_fairness_share) {
            return Err(Error::Config(
                "min_fairness_share must be within [0, 1]".to_string(),
            ));
        }
        if self.rate_limit_per_minute <= 0.0 {
            return Err(Error::Config(
                "rate_limit_per_minute must be > 0".to_string(),
            ));
        }
        if self.max_decisions == 0 {
            return Err(Error::Config("max_decisions must be >= 1".to_string()));
        }
        if self.pool_429_penalty_window_ms == 0 {
            return Err(Error::Config(
                "pool_429_penalty_window_ms must be >= 1".to_string(),
            ));
        }
        for (name, tier) in [
            ("light", &self.tiers.light),
            ("medium", &self.tiers.medium),
            ("heavy", &self.tiers.heavy),
        ] {
            if tier.models.is_empty() {
                return Err(Error::Config(format!(
                    "tiers.{name}.models must not be empty"
                )));
            }
        }
        if self.glm5.enabled && !(0.0..=1.0).contains(&self.glm5.preference_percent) {
            return Err(Error::Config(
                "glm5.preference_percent must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}
