//! Exponential backoff with jitter for job retries.

use std::time::Duration;

/// Backoff schedule: `base * 2^(attempts - 1)` with optional jitter, per
/// the queue manager's retry contract.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Delay before the `attempt`-th retry (1-indexed: the first retry
    /// after the original attempt is `attempt = 1`).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let raw = (self.base_delay_ms as f64) * 2f64.powi(exponent as i32);
        let capped = raw.min(self.max_delay_ms as f64) as u64;
        let delay_ms = if self.jitter {
            let jitter_amount = (capped as f64 * 0.25 * rand::random::<f64>()) as u64;
            capped + jitter_amount
        } else {
            capped
        };
        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_without_jitter() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::new(5)
        };
        assert_eq!(policy.backoff_delay(1).as_millis(), 1_000);
        assert_eq!(policy.backoff_delay(2).as_millis(), 2_000);
        assert_eq!(policy.backoff_delay(3).as_millis(), 4_000);
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let policy = RetryPolicy {
            jitter: false,
            max_delay_ms: 5_000,
            ..RetryPolicy::new(10)
        };
        assert_eq!(policy.backoff_delay(10).as_millis(), 5_000);
    }
}
