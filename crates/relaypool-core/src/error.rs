//! Error types for relaypool-core.
//!
//! Errors are layered: a top-level [`Error`] wraps the handful of kinds the
//! control plane can actually fail with. Recoverable admission outcomes
//! (no available keys, all models cooling down) are represented as data on
//! a [`crate::decision::SelectionOutcome`], never as an `Err` here — only
//! configuration/schema failures and internal invariant violations are.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for relaypool-core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("snapshot schema error: {0}")]
    Snapshot(String),

    #[error("internal invariant violation: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML config: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("failed to parse YAML config: {0}")]
    YamlDe(#[from] serde_yaml::Error),
}
