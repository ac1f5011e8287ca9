//! Token-bucket retry budget.
//!
//! # Responsibilities
//! - Bound how often a pacing-sensitive action (a reconnect, a retry) may run
//! - Refill continuously, proportionally to elapsed monotonic time
//! - Grant the first action after construction or `reset` for free
//!
//! # Design Decisions
//! - Float token state, clamped to `[0, capacity]` after every refill
//! - Callers pass `now` explicitly so the bucket never reads a clock itself
//! - Owned by a single actor; never shared behind a lock

use std::time::Duration;
use tokio::time::Instant;

use crate::config::BudgetConfig;

/// Token bucket that converts a shortage of permits into a wait duration.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    /// Maximum number of stored permits (`max_attempts - 1`).
    capacity: f64,
    /// Currently stored permits.
    tokens: f64,
    /// Instant of the last refill.
    last_refill: Instant,
    /// Time needed to regenerate a single permit.
    spacing: Duration,
    /// Free actions granted before the bucket is consulted.
    warmup_allowance: u32,
}

impl RetryBudget {
    /// Create a full bucket.
    ///
    /// `max_attempts` must be at least 2 and `replenish_interval` non-zero;
    /// configuration validation enforces both before a budget is built.
    pub fn new(max_attempts: u32, replenish_interval: Duration, now: Instant) -> Self {
        let capacity = f64::from(max_attempts.saturating_sub(1).max(1));
        let spacing = replenish_interval.div_f64(capacity);
        Self {
            capacity,
            tokens: capacity,
            last_refill: now,
            spacing,
            warmup_allowance: 1,
        }
    }

    /// Build a budget from a validated configuration section.
    pub fn from_config(config: &BudgetConfig, now: Instant) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_secs(config.replenish_secs),
            now,
        )
    }

    /// Return how long the caller must wait before its next action.
    ///
    /// Consumes one permit (or the warmup allowance) when one is available.
    pub fn next_delay(&mut self, now: Instant) -> Duration {
        self.refill(now);

        if self.warmup_allowance > 0 {
            self.warmup_allowance -= 1;
            return Duration::ZERO;
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Duration::ZERO;
        }

        let deficit = (1.0 - self.tokens).max(0.0);
        self.tokens = 0.0;
        self.spacing.mul_f64(deficit)
    }

    /// Restore the bucket after a proven success.
    ///
    /// Tokens drop to one below capacity so a reset never permits an
    /// immediate full burst, while the warmup allowance grants one free probe.
    pub fn reset(&mut self, now: Instant) {
        self.tokens = if self.capacity >= 2.0 {
            self.capacity - 1.0
        } else {
            self.capacity
        };
        self.last_refill = now;
        self.warmup_allowance = 1;
    }

    /// Currently stored permits.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Maximum number of stored permits.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if !self.spacing.is_zero() {
            let regenerated = elapsed.as_secs_f64() / self.spacing.as_secs_f64();
            self.tokens = (self.tokens + regenerated).clamp(0.0, self.capacity);
        }
        self.last_refill = self.last_refill.max(now);
    }
}
