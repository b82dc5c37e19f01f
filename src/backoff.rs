use std::time::Duration;

use crate::config::QueueConfig;

/// Exponential backoff between delivery attempts.
///
/// `delay = min(base * multiplier^(attempts - 1), cap)`. No jitter is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before the next attempt, given how many attempts have been used.
    pub fn delay_for(&self, attempts: u32, multiplier: f64) -> Duration {
        let exp = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = multiplier.powi(exp);
        let millis = self.base.as_millis() as f64 * factor;
        let cap_millis = self.cap.as_millis() as f64;

        if !millis.is_finite() || millis >= cap_millis {
            return self.cap;
        }
        Duration::from_millis(millis.max(0.0).round() as u64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            cap: Duration::from_millis(300_000),
        }
    }
}

impl From<&QueueConfig> for BackoffPolicy {
    fn from(cfg: &QueueConfig) -> Self {
        Self::new(cfg.base_delay, cfg.max_delay)
    }
}
