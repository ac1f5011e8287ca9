//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

use crate::config::BackoffConfig;

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self { initial, multiplier, max }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_ms),
            config.multiplier,
            Duration::from_millis(config.max_ms),
        )
    }

    /// Delay before the given attempt (1-based). Attempt 0 never waits.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        let millis = self.initial.as_millis() as f64 * factor;
        if !millis.is_finite() || millis >= self.max.as_millis() as f64 {
            return self.max;
        }
        Duration::from_millis(millis as u64).min(self.max)
    }
}

/// Uniform jitter in `[0, upper)`. Zero when `upper` is zero.
pub fn jitter(upper: Duration) -> Duration {
    let upper_ms = upper.as_millis() as u64;
    if upper_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..upper_ms))
}
