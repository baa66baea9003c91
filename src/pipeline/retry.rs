//! Retry schedule for transient lookup failures
//!
//! Exponential backoff with an optional 25% jitter, capped at `max_backoff`.

use crate::config::schema::EnrichmentConfig;
use rand::Rng;
use std::time::Duration;

/// Bounded retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per lookup, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EnrichmentConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            jitter: true,
        }
    }

    /// Deterministic schedule, for tests and reproducible runs
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base_ms = (self.initial_backoff.as_millis() as u64).saturating_mul(1u64 << exponent);
        let capped_ms = base_ms.min(self.max_backoff.as_millis() as u64);

        let final_ms = if self.jitter && capped_ms > 0 {
            let jitter = rand::rng().random_range(0..=capped_ms / 4);
            capped_ms.saturating_add(jitter)
        } else {
            capped_ms
        };

        Duration::from_millis(final_ms)
    }
}
