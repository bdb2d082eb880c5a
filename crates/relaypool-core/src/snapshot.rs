//! Versioned, schema-validated read-only snapshots.
//!
//! Used by drift detection and explain endpoints. `state`/`excluded_reason`
//! are drawn from closed enums to keep label cardinality bounded; unknown
//! fields pass through a flattened bag for forward compatibility, matching
//! the teacher's versioned-manifest convention rather than pulling in a
//! separate JSON-schema crate.

use crate::config::PoolConfig;
use crate::model_router::{ModelRouter, Tier};
use crate::reason::Reason;
use crate::scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `(major, minor)` schema version pair for both snapshot kinds.
pub const SNAPSHOT_SCHEMA_VERSION: (u32, u32) = (1, 0);

fn version_string() -> String {
    format!("{}.{}", SNAPSHOT_SCHEMA_VERSION.0, SNAPSHOT_SCHEMA_VERSION.1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Available,
    Excluded,
    RateLimited,
    CircuitOpen,
    Cooldown,
    AtCapacity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySnapshot {
    pub version: String,
    pub timestamp: u64,
    pub key_index: usize,
    pub key_id: String,
    pub state: KeyState,
    pub in_flight: u32,
    pub max_concurrency: u32,
    pub excluded_reason: Option<Reason>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub model_id: String,
    pub tier: Tier,
    pub in_flight: u32,
    pub max_concurrency: u32,
    pub is_available: bool,
    pub cooldown_until: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub version: String,
    pub timestamp: u64,
    pub models: Vec<ModelSnapshot>,
}

/// Parsing/validation error for a snapshot read from outside the process
/// (e.g. over the wire to a drift checker).
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot schema major version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Validate that a deserialized `version` string's major component matches
/// this build's schema major version.
pub fn validate_version(version: &str) -> Result<(), SnapshotError> {
    let major: u32 = version
        .split('.')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or(SnapshotError::MissingField("version"))?;
    if major != SNAPSHOT_SCHEMA_VERSION.0 {
        return Err(SnapshotError::VersionMismatch {
            expected: SNAPSHOT_SCHEMA_VERSION.0,
            actual: major,
        });
    }
    Ok(())
}

/// Map the credential's own exclusion reason (independent of any specific
/// request's exclude list) onto the closed [`KeyState`] enum.
fn key_state(reason: Option<Reason>) -> KeyState {
    match reason {
        None => KeyState::Available,
        Some(Reason::ExcludedAtMaxConcurrency) => KeyState::AtCapacity,
        Some(Reason::ExcludedCircuitOpen) => KeyState::CircuitOpen,
        Some(Reason::ExcludedSlowQuarantine) => KeyState::Cooldown,
        Some(Reason::ExcludedRateLimited | Reason::ExcludedTokenExhausted) => KeyState::RateLimited,
        Some(_) => KeyState::Excluded,
    }
}

pub fn key_snapshot(
    scheduler: &Scheduler,
    config: &PoolConfig,
    index: usize,
    now_ms: u64,
) -> Option<KeySnapshot> {
    let cred = scheduler.credentials().get(index)?;
    let in_flight = cred.in_flight();
    let excluded_reason = cred.current_exclusion_reason(config, now_ms);
    Some(KeySnapshot {
        version: version_string(),
        timestamp: now_ms,
        key_index: index,
        key_id: cred.id.clone(),
        state: key_state(excluded_reason),
        in_flight,
        max_concurrency: config.max_concurrency_per_key,
        excluded_reason,
        extra: HashMap::new(),
    })
}

pub fn all_key_snapshots(scheduler: &Scheduler, config: &PoolConfig, now_ms: u64) -> Vec<KeySnapshot> {
    (0..scheduler.credentials().len())
        .filter_map(|i| key_snapshot(scheduler, config, i, now_ms))
        .collect()
}

pub fn pool_snapshot_all(router: &ModelRouter, now_ms: u64) -> PoolSnapshot {
    let models = router
        .models()
        .iter()
        .map(|m| ModelSnapshot {
            model_id: m.id.clone(),
            tier: m.tier,
            in_flight: m.in_flight(),
            max_concurrency: m.max_concurrency(),
            is_available: m.is_available(now_ms),
            cooldown_until: m.cooldown_until_ms(now_ms),
        })
        .collect();
    PoolSnapshot {
        version: version_string(),
        timestamp: now_ms,
        models,
    }
}
