//! Per-credential token bucket and rate-limit cooldown.
//!
//! The token bucket allows bursts up to `capacity` while enforcing an
//! average rate over time, via timestamp-based lazy refill (no background
//! threads). On top of the bucket, [`KeyRateLimiter`] layers the
//! exponential-backoff cooldown that a credential enters after an upstream
//! 429, which is checked ahead of the bucket so the two signals never both
//! fire for the same decision.
//!
//! # Algorithm
//!
//! - Bucket holds up to `capacity` tokens, refilling at `refill_rate`
//!   tokens per second.
//! - `peek_limit` reports availability without consuming.
//! - `check_limit` atomically consumes a token if available.

use serde::{Deserialize, Serialize};

// =============================================================================
// TokenBucket
// =============================================================================

/// A token bucket rate limiter.
///
/// Uses a timestamp-based lazy refill: tokens accumulate between calls
/// without background threads.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill_ms: u64,
    total_consumed: u64,
    total_denied: u64,
}

impl TokenBucket {
    /// Create a new token bucket, starting full.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` or `refill_rate` is not positive.
    #[must_use]
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        assert!(capacity > 0.0, "capacity must be positive");
        assert!(refill_rate > 0.0, "refill_rate must be positive");
        Self {
            capacity,
            refill_rate,
            tokens: capacity,
            last_refill_ms: 0,
            total_consumed: 0,
            total_denied: 0,
        }
    }

    /// Create a token bucket with an initial timestamp.
    #[must_use]
    pub fn with_time(capacity: f64, refill_rate: f64, now_ms: u64) -> Self {
        let mut bucket = Self::new(capacity, refill_rate);
        bucket.last_refill_ms = now_ms;
        bucket
    }

    fn refill(&mut self, now_ms: u64) {
        if now_ms <= self.last_refill_ms {
            return;
        }
        let elapsed_secs = (now_ms - self.last_refill_ms) as f64 / 1000.0;
        let new_tokens = elapsed_secs * self.refill_rate;
        self.tokens = (self.tokens + new_tokens).min(self.capacity);
        self.last_refill_ms = now_ms;
    }

    /// Whether a token is currently available, without consuming it.
    pub fn peek(&mut self, now_ms: u64) -> bool {
        self.refill(now_ms);
        self.tokens >= 1.0
    }

    /// Atomically consume one token if available. Returns `true` on success.
    pub fn try_acquire(&mut self, now_ms: u64) -> bool {
        self.refill(now_ms);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            self.total_consumed += 1;
            true
        } else {
            self.total_denied += 1;
            false
        }
    }

    /// How long (ms) until a token is available. 0 if already available.
    #[must_use]
    pub fn wait_time_ms(&mut self, now_ms: u64) -> u64 {
        self.refill(now_ms);
        let deficit = 1.0 - self.tokens;
        if deficit <= 0.0 {
            0
        } else {
            (deficit / self.refill_rate * 1000.0).ceil() as u64
        }
    }

    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    #[must_use]
    pub fn stats(&self) -> BucketStats {
        BucketStats {
            capacity: self.capacity,
            refill_rate: self.refill_rate,
            current_tokens: self.tokens,
            total_consumed: self.total_consumed,
            total_denied: self.total_denied,
            fill_ratio: self.tokens / self.capacity,
        }
    }

    /// Reset to full capacity.
    pub fn reset(&mut self, now_ms: u64) {
        self.tokens = self.capacity;
        self.last_refill_ms = now_ms;
    }
}

/// Serializable token bucket statistics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BucketStats {
    pub capacity: f64,
    pub refill_rate: f64,
    pub current_tokens: f64,
    pub total_consumed: u64,
    pub total_denied: u64,
    pub fill_ratio: f64,
}

/// Construct a [`TokenBucket`] sized for a per-minute rate: capacity equals
/// the per-minute rate, refilling continuously at `rate / 60` tokens/sec.
#[must_use]
pub fn bucket_for_rate_per_minute(rate_per_minute: f64, now_ms: u64) -> TokenBucket {
    TokenBucket::with_time(rate_per_minute, rate_per_minute / 60.0, now_ms)
}

// =============================================================================
// KeyRateLimiter: bucket + rate-limit cooldown
// =============================================================================

/// Outcome of a rate-limit admission check for a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    /// In the exponential-backoff cooldown entered after an upstream 429.
    InCooldown,
    /// Bucket has no tokens available (and not in cooldown).
    TokensExhausted,
}

/// Per-credential rate limiter: a token bucket plus a 429-triggered cooldown.
///
/// The cooldown is checked ahead of the bucket. A credential in cooldown is
/// never additionally bucket-checked, keeping the two exclusion reasons
/// mutually exclusive per decision.
#[derive(Debug, Clone)]
pub struct KeyRateLimiter {
    bucket: TokenBucket,
    rate_limited_at: Option<u64>,
    cooldown_ms: u64,
    streak: u32,
    base_ms: u64,
    cap_ms: u64,
}

impl KeyRateLimiter {
    #[must_use]
    pub fn new(rate_per_minute: f64, base_ms: u64, cap_ms: u64, now_ms: u64) -> Self {
        Self {
            bucket: bucket_for_rate_per_minute(rate_per_minute, now_ms),
            rate_limited_at: None,
            cooldown_ms: 0,
            streak: 0,
            base_ms,
            cap_ms,
        }
    }

    /// Peek without consuming: reports the decision that `check` would make.
    pub fn peek(&mut self, now_ms: u64) -> RateLimitDecision {
        if self.in_cooldown(now_ms) {
            return RateLimitDecision::InCooldown;
        }
        if self.bucket.peek(now_ms) {
            RateLimitDecision::Allowed
        } else {
            RateLimitDecision::TokensExhausted
        }
    }

    /// Atomically check and consume a token if allowed.
    pub fn check(&mut self, now_ms: u64) -> RateLimitDecision {
        if self.in_cooldown(now_ms) {
            return RateLimitDecision::InCooldown;
        }
        if self.bucket.try_acquire(now_ms) {
            RateLimitDecision::Allowed
        } else {
            RateLimitDecision::TokensExhausted
        }
    }

    fn in_cooldown(&self, now_ms: u64) -> bool {
        match self.rate_limited_at {
            Some(started) => now_ms.saturating_sub(started) < self.cooldown_ms,
            None => false,
        }
    }

    /// Record an upstream 429 against this credential: starts (or extends) the
    /// exponential-backoff cooldown.
    pub fn record_rate_limited(&mut self, now_ms: u64) {
        self.streak += 1;
        let scaled = self.base_ms.saturating_mul(1u64 << self.streak.min(20));
        self.cooldown_ms = scaled.min(self.cap_ms);
        self.rate_limited_at = Some(now_ms);
    }

    /// Record a successful call: clears the cooldown streak.
    pub fn record_success(&mut self) {
        self.streak = 0;
        self.rate_limited_at = None;
        self.cooldown_ms = 0;
    }

    #[must_use]
    pub fn cooldown_remaining_ms(&self, now_ms: u64) -> u64 {
        match self.rate_limited_at {
            Some(started) => self.cooldown_ms.saturating_sub(now_ms.saturating_sub(started)),
            None => 0,
        }
    }

    #[must_use]
    pub fn bucket_stats(&self) -> BucketStats {
        self.bucket.stats()
    }
}
