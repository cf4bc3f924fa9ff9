//! Reconnect delays for the event stream.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Consecutive failures tolerated before giving up.
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(5 * 60),
            max_retries: 10,
        }
    }
}

/// Exponential backoff over consecutive failures. The k-th failure waits
/// `min(initial * 2^(k-1), max)`; a successful open resets the count.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failure and return the delay before the next attempt, or
    /// `None` once the retry budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.failures > self.policy.max_retries {
            return None;
        }

        let exponent = (self.failures - 1).min(31);
        let delay = self
            .policy
            .initial
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.policy.max);
        Some(delay.min(self.policy.max))
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
