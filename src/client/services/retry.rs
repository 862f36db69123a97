//! Reconnect scheduling for the chat transport.

use rand::Rng;
use std::time::Duration;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
    /// One attempt per `delay`, with no limit on the number of attempts.
    Fixed { delay: Duration },
    /// Exponential backoff with symmetric jitter, giving up after
    /// `max_attempts` consecutive failures.
    Backoff {
        initial: Duration,
        max: Duration,
        multiplier: f64,
        /// Fraction of the computed delay, in `0.0..=1.0`.
        jitter: f64,
        max_attempts: u32,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Backoff {
            initial: DEFAULT_RECONNECT_DELAY,
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        RetryPolicy::Fixed { delay }
    }

    /// Delay to wait before reconnect attempt `attempt` (1-based, counted since
    /// the connection was last open). `None` means give up.
    pub fn delay_for<R: Rng>(&self, attempt: u32, rng: &mut R) -> Option<Duration> {
        match self {
            RetryPolicy::Fixed { delay } => Some(*delay),
            RetryPolicy::Backoff {
                initial,
                max,
                multiplier,
                jitter,
                max_attempts,
            } => {
                if attempt == 0 || attempt > *max_attempts {
                    return None;
                }
                let exponent = (attempt - 1).min(32) as i32;
                let cap = max.as_secs_f64();
                let base = (initial.as_secs_f64() * multiplier.powi(exponent)).min(cap);
                let jitter = jitter.clamp(0.0, 1.0);
                let factor = if jitter > 0.0 {
                    rng.gen_range((1.0 - jitter)..=(1.0 + jitter))
                } else {
                    1.0
                };
                Some(Duration::from_secs_f64((base * factor).min(cap)))
            }
        }
    }

    pub fn max_attempts(&self) -> Option<u32> {
        match self {
            RetryPolicy::Fixed { .. } => None,
            RetryPolicy::Backoff { max_attempts, .. } => Some(*max_attempts),
        }
    }
}
