//! Pool-wide cooldown controller.
//!
//! Unlike the per-credential rate-limit cooldown, this is a single
//! process-wide state: when 429s across *different* credentials cluster
//! within `sleep_threshold_ms`, the whole pool enters one shared sleep
//! window. It never splits traffic within that window (§3.2 invariant 6).

use crate::config::PoolCooldownConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

struct Inner {
    recent_429s: VecDeque<(u64, String)>, // (timestamp, credential_id)
    cooldown_until_ms: u64,
    streak: u32,
    last_429_ms: Option<u64>,
}

/// Process-wide pool cooldown state.
pub struct PoolCooldown {
    config: PoolCooldownConfig,
    inner: Mutex<Inner>,
}

impl PoolCooldown {
    #[must_use]
    pub fn new(config: PoolCooldownConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                recent_429s: VecDeque::new(),
                cooldown_until_ms: 0,
                streak: 0,
                last_429_ms: None,
            }),
        }
    }

    /// Report a 429 from `credential_id`. May trigger the pool-wide
    /// cooldown if 429s from distinct credentials cluster within the
    /// configured threshold.
    pub fn record_429(&self, credential_id: &str, now_ms: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.recent_429s.push_back((now_ms, credential_id.to_string()));
        while let Some(&(ts, _)) = inner.recent_429s.front() {
            if now_ms.saturating_sub(ts) > self.config.sleep_threshold_ms {
                inner.recent_429s.pop_front();
            } else {
                break;
            }
        }
        let distinct: std::collections::HashSet<&str> = inner
            .recent_429s
            .iter()
            .map(|(_, id)| id.as_str())
            .collect();

        inner.last_429_ms = Some(now_ms);

        if distinct.len() >= 2 {
            inner.streak = inner.streak.saturating_add(1);
            let base = self
                .config
                .base_ms
                .saturating_mul(1u64 << inner.streak.min(20));
            let duration = base.min(self.config.max_cooldown_ms);
            let jitter = rand::thread_rng().gen_range(0..=self.config.retry_jitter_ms.max(1));
            inner.cooldown_until_ms = now_ms + duration + jitter;
        }
    }

    /// Current cooldown status.
    #[must_use]
    pub fn status(&self, now_ms: u64) -> PoolCooldownStatus {
        let inner = self.inner.lock().unwrap();
        let remaining = inner.cooldown_until_ms.saturating_sub(now_ms);

        // Decay the streak once sleep_threshold_ms has passed with no
        // further 429s, per the decay window configured for the pool.
        let decayed_streak = match inner.last_429_ms {
            Some(last) if now_ms.saturating_sub(last) >= self.config.decay_ms => 0,
            _ => inner.streak,
        };

        PoolCooldownStatus {
            in_cooldown: remaining > 0,
            cooldown_remaining_ms: remaining,
            pool_429_count: inner.recent_429s.len() as u32,
            streak: decayed_streak,
        }
    }

    /// Whether the pool is currently in its cooldown window.
    #[must_use]
    pub fn in_cooldown(&self, now_ms: u64) -> bool {
        self.status(now_ms).in_cooldown
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolCooldownStatus {
    pub in_cooldown: bool,
    pub cooldown_remaining_ms: u64,
    pub pool_429_count: u32,
    pub streak: u32,
}
