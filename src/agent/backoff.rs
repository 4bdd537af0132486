//! Retry schedule with capped exponential backoff and proportional jitter.
//!
//! The schedule is a pure function of the retry number and a jitter
//! fraction, so it can be tested without sleeping. The randomness is drawn
//! by the caller.

use std::time::Duration;

use crate::error::AgentError;

/// Fraction of the current delay added as random jitter, at most.
pub const JITTER_RATIO: f64 = 0.3;

/// Retry and backoff parameters for model calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied after each retry (2.0–3.0).
    pub factor: f64,
    /// Upper bound on any single delay, jitter included.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 8,
            initial_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Checks that the schedule is well formed.
    ///
    /// The factor is bounded below by 2 so that a delay plus its maximum
    /// jitter never exceeds the next delay, which keeps the schedule
    /// non-decreasing.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidConfig`] when a bound is violated.
    pub fn validate(&self) -> Result<(), AgentError> {
        if !(2.0..=3.0).contains(&self.factor) {
            return Err(AgentError::InvalidConfig {
                message: format!("backoff factor must be within 2.0..=3.0, got {}", self.factor),
            });
        }
        if self.initial_delay.is_zero() || self.initial_delay > self.max_delay {
            return Err(AgentError::InvalidConfig {
                message: format!(
                    "initial backoff ({:?}) must be non-zero and not exceed the cap ({:?})",
                    self.initial_delay, self.max_delay
                ),
            });
        }
        Ok(())
    }

    /// Delay before retry `retry` (0-based) without jitter, capped.
    #[must_use]
    pub fn base_delay(&self, retry: u32) -> Duration {
        let cap_ms = self.max_delay.as_secs_f64() * 1000.0;
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let ms = self.initial_delay.as_secs_f64() * 1000.0 * self.factor.powi(exponent);
        Duration::from_secs_f64(ms.min(cap_ms) / 1000.0)
    }

    /// Delay before retry `retry` with `jitter_fraction` (clamped to `[0, 1)`)
    /// of [`JITTER_RATIO`] added, capped at [`RetryPolicy::max_delay`].
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32, jitter_fraction: f64) -> Duration {
        let base = self.base_delay(retry);
        let fraction = jitter_fraction.clamp(0.0, 1.0);
        let jitter = base.mul_f64(JITTER_RATIO * fraction);
        (base + jitter).min(self.max_delay)
    }

    /// Whether another retry is allowed after `retries_done` retries.
    #[must_use]
    pub const fn allows_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(120),
        }
    }

    #[test]
    fn test_base_delay_doubles() {
        let p = policy();
        assert_eq!(p.base_delay(0), Duration::from_secs(1));
        assert_eq!(p.base_delay(1), Duration::from_secs(2));
        assert_eq!(p.base_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_base_delay_capped() {
        let p = policy();
        assert_eq!(p.base_delay(7), Duration::from_secs(120));
        assert_eq!(p.base_delay(u32::MAX), Duration::from_secs(120));
    }

    #[test]
    fn test_jitter_bounded() {
        let p = policy();
        let d = p.delay_for_retry(2, 0.999);
        assert!(d >= Duration::from_secs(4));
        assert!(d < Duration::from_millis(5_200));
    }

    #[test]
    fn test_jitter_never_exceeds_cap() {
        let p = policy();
        // 64 s plus 30% jitter stays under the cap.
        let below_cap = p.delay_for_retry(6, 0.99);
        assert!(below_cap > Duration::from_secs(83) && below_cap < Duration::from_secs(84));
        // 128 s is already past it.
        assert_eq!(p.delay_for_retry(7, 0.99), Duration::from_secs(120));
        assert!(p.delay_for_retry(6, 1.0) <= p.max_delay);
    }

    #[test]
    fn test_allows_retry() {
        let p = RetryPolicy {
            max_retries: 3,
            ..policy()
        };
        assert!(p.allows_retry(2));
        assert!(!p.allows_retry(3));
    }

    #[test]
    fn test_validate_bounds() {
        assert!(policy().validate().is_ok());
        let slow = RetryPolicy {
            factor: 1.2,
            ..policy()
        };
        assert!(slow.validate().is_err());
        let zero = RetryPolicy {
            initial_delay: Duration::ZERO,
            ..policy()
        };
        assert!(zero.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_schedule_non_decreasing_and_capped(
            factor in 2.0f64..=3.0,
            initial_ms in 1u64..5_000,
            cap_s in 5u64..300,
            jitters in proptest::collection::vec(0.0f64..1.0, 1..24),
        ) {
            let p = RetryPolicy {
                max_retries: 24,
                initial_delay: Duration::from_millis(initial_ms),
                factor,
                max_delay: Duration::from_secs(cap_s),
            };
            let mut previous = Duration::ZERO;
            for (retry, jitter) in jitters.iter().enumerate() {
                let retry = u32::try_from(retry).unwrap_or(u32::MAX);
                let delay = p.delay_for_retry(retry, *jitter);
                prop_assert!(delay <= p.max_delay);
                prop_assert!(delay >= previous);
                previous = delay;
            }
        }
    }
}
