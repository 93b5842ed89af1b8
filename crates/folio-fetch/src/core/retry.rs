use std::time::Duration;

use rand::Rng;

use crate::data::RetryPolicy;

/// Delay before retry number `retry_count` (0-indexed): `base * 2^retry_count`.
///
/// ```
/// use std::time::Duration;
/// use folio_fetch::retry_delay;
///
/// assert_eq!(retry_delay(0, Duration::from_millis(100)), Duration::from_millis(100));
/// assert_eq!(retry_delay(2, Duration::from_millis(100)), Duration::from_millis(400));
/// ```
pub fn retry_delay(retry_count: u32, base: Duration) -> Duration {
    let multiplier = 2_u32.saturating_pow(retry_count.min(31));
    base.saturating_mul(multiplier)
}

/// What to do after a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then make attempt number `attempt` (1-indexed).
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

/// Attempt counter and next-delay calculation for one retried operation.
///
/// Holds no clock and never sleeps; the caller owns scheduling.
#[derive(Clone, Debug)]
pub struct RetryState {
    policy:   RetryPolicy,
    attempts: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Failed attempts recorded so far.
    pub fn attempts(&self) -> u32 { self.attempts }

    pub fn on_failure(&mut self) -> RetryDecision {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts() {
            return RetryDecision::Exhausted {
                attempts: self.attempts,
            };
        }
        let capped = self.capped_delay(self.attempts - 1);
        RetryDecision::Retry {
            attempt: self.attempts + 1,
            delay:   capped.saturating_add(jitter(capped, self.policy.jitter_percent)),
        }
    }

    pub fn reset(&mut self) { self.attempts = 0; }

    fn capped_delay(&self, retry_count: u32) -> Duration {
        retry_delay(retry_count, self.policy.base_delay).min(self.policy.max_delay)
    }
}

fn jitter(delay: Duration, percent: u32) -> Duration {
    if percent == 0 {
        return Duration::ZERO;
    }
    let max_ms = (delay.as_millis() as u64).saturating_mul(u64::from(percent)) / 100;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}
