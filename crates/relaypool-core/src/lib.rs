//! Credential and model pool control plane for an LLM API reverse proxy.
//!
//! Sits behind the dispatcher: picks which upstream credential and model to
//! use for each request, tracks per-credential circuit breakers and rate
//! limits, routes across model tiers, and records every selection decision
//! for fairness auditing and drift detection. See `Pool` in
//! [`control_plane`] for the main entry point.
//!
//! # Modules
//!
//! - `control_plane`: top-level `Pool`, wiring the pieces below behind one handle
//! - `scheduler`: credential selection (health score, fairness, quarantine)
//! - `circuit_breaker`: per-credential CLOSED/OPEN/HALF_OPEN state machine
//! - `rate_limiter`: token-bucket limiting and rate-limit cooldown backoff
//! - `model_router`: tiered model selection with cooldowns and downgrades
//! - `pool_cooldown`: pool-wide 429 cooldown window
//! - `decision_recorder`: bounded audit trail and fairness metrics
//! - `snapshot`: versioned, schema-validated state snapshots
//! - `config`: layered configuration loading and validation
//! - `metrics`: counters and gauges for the above
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod circuit_breaker;
pub mod collaborators;
pub mod config;
pub mod control_plane;
pub mod decision;
pub mod decision_recorder;
pub mod error;
pub mod logging;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod model_router;
pub mod pool_cooldown;
pub mod rate_limiter;
pub mod reason;
pub mod ring_buffer;
pub mod scheduler;
pub mod snapshot;
pub mod strategies;

pub use control_plane::{DispatchPlan, Pool};
pub use error::{Error, Result};
