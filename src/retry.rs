//! Retry decisions for failed delivery attempts.
//!
//! The attempt budget is fixed per message (`max_attempts`). What the policy
//! adds is *when* a retried message becomes due again: immediately on the
//! next poll, or after an exponentially growing delay.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// What happens to a message after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stays pending, due again at `retry_at` (or immediately if `None`).
    Retry { retry_at: Option<DateTime<Utc>> },
    /// Attempt budget exhausted.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Leave `scheduled_at` untouched.
    #[default]
    Immediate,
    /// Delay by `base * 2^(attempts - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(backoff: Backoff) -> Self {
        Self { backoff }
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Decide the fate of a message whose failed attempt brought it to
    /// `attempts` (already incremented).
    pub fn outcome(&self, attempts: u32, max_attempts: u32, now: DateTime<Utc>) -> Outcome {
        if attempts >= max_attempts {
            return Outcome::Fail;
        }

        Outcome::Retry {
            retry_at: self.delay(attempts).map(|delay| now + delay),
        }
    }

    /// Delay before the next attempt, `None` when retries are immediate.
    pub fn delay(&self, attempts: u32) -> Option<chrono::Duration> {
        match self.backoff {
            Backoff::Immediate => None,
            Backoff::Exponential { base, max } => {
                let exponent = attempts.saturating_sub(1).min(31);
                let delay = base
                    .checked_mul(1u32 << exponent)
                    .map_or(max, |delay| delay.min(max));

                chrono::Duration::from_std(delay).ok()
            }
        }
    }
}
