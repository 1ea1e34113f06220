//! Timeout and retry policy shared by forward and compensating steps.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Bounded wait and retry budget for every outstanding command.
///
/// The wait before attempt `n` is declared lost grows exponentially from
/// `step_timeout` and is capped at `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// How long the first attempt waits for a response.
    pub step_timeout: Duration,
    /// Total sends of the same command before the step is given up.
    pub max_attempts: u32,
    /// Upper bound for a single wait.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Creates a policy, clamping `max_attempts` to at least one.
    pub fn new(step_timeout: Duration, max_attempts: u32, max_backoff: Duration) -> Self {
        Self {
            step_timeout,
            max_attempts: max_attempts.max(1),
            max_backoff: max_backoff.max(step_timeout),
        }
    }

    /// The wait after sending attempt number `attempt` (1-based).
    pub fn wait_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.step_timeout
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// The deadline for attempt number `attempt` sent at `sent_at`.
    pub fn deadline(&self, sent_at: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
        let wait = TimeDelta::from_std(self.wait_for_attempt(attempt)).unwrap_or(TimeDelta::MAX);
        sent_at
            .checked_add_signed(wait)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns true if another attempt is allowed after `attempts` sends.
    pub fn can_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), 3, Duration::from_secs(300))
    }
}
