use rand::Rng;
use std::time::Duration;

use crate::config::ReconnectConfig;

/// Decision returned by the reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Attempts exhausted; go offline until asked to reconnect.
    GiveUp,
    /// Try again after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff with jitter and a cap on consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts tolerated before giving up.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier per consecutive failure.
    pub factor: u32,
    /// Upper bound on a single delay, jitter included.
    pub max_delay: Duration,
    /// Random spread as a fraction of the delay (0.2 = ±20%).
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            factor: cfg.factor.max(1),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            jitter: cfg.jitter.clamp(0.0, 1.0),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based: 1 = first failure).
    pub fn decide(&self, attempt: u32) -> ReconnectDecision {
        if attempt > self.max_attempts {
            return ReconnectDecision::GiveUp;
        }
        let base = self.delay_without_jitter(attempt);
        let spread = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        ReconnectDecision::RetryAfter(apply_jitter(base, spread).min(self.max_delay))
    }

    /// base × factor^(attempt-1), capped at `max_delay`.
    pub fn delay_without_jitter(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let mult = self.factor.saturating_pow(exp);
        self.base_delay.saturating_mul(mult).min(self.max_delay)
    }
}

fn apply_jitter(delay: Duration, spread: f64) -> Duration {
    delay.mul_f64((1.0 + spread).max(0.0))
}
