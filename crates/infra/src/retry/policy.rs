//! Backoff policy: how long to wait before each retry and when to stop.

use std::time::Duration;

/// Retry policy configuration.
///
/// `max_attempts` counts **retries after the first invocation**: a message is
/// handed to the processing callback at most `max_attempts + 1` times.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    initial_interval: Duration,
    multiplier: f64,
    max_interval: Duration,
    max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("multiplier must be a finite number >= 1.0, got {0}")]
    InvalidMultiplier(f64),
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_millis(5000))
    }
}

impl RetryPolicy {
    /// Create a policy, rejecting multipliers that would make delays shrink.
    pub fn new(
        initial_interval: Duration,
        multiplier: f64,
        max_interval: Duration,
        max_attempts: u32,
    ) -> Result<Self, PolicyError> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(PolicyError::InvalidMultiplier(multiplier));
        }

        Ok(Self {
            initial_interval,
            multiplier,
            max_interval,
            max_attempts,
        })
    }

    /// Create a policy with no retries: the first failure is terminal.
    pub fn no_retry() -> Self {
        Self::fixed(0, Duration::ZERO)
    }

    /// Create a policy with the same delay before every retry.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            initial_interval: delay,
            multiplier: 1.0,
            max_interval: delay,
            max_attempts,
        }
    }

    /// Create a policy with exponential backoff capped at `max_interval`.
    pub fn exponential(
        max_attempts: u32,
        initial_interval: Duration,
        multiplier: f64,
        max_interval: Duration,
    ) -> Result<Self, PolicyError> {
        Self::new(initial_interval, multiplier, max_interval, max_attempts)
    }

    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Upper bound on callback invocations for one message.
    pub fn max_invocations(&self) -> u32 {
        self.max_attempts.saturating_add(1)
    }

    /// Delay before retry number `attempt` (1-indexed).
    ///
    /// `min(initial_interval * multiplier^(attempt - 1), max_interval)`, saturating
    /// at `max_interval` instead of overflowing.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.initial_interval.as_millis() as f64;
        let max_ms = self.max_interval.as_millis() as f64;
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let delay_ms = base_ms * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= max_ms {
            return self.max_interval;
        }

        Duration::from_millis(delay_ms as u64)
    }

    /// Whether a message that has failed `failures` times gets another invocation.
    pub fn should_retry(&self, failures: u32) -> bool {
        failures <= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn default_matches_reference_deployment() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.initial_interval(), ms(5000));
        assert_eq!(policy.multiplier(), 1.0);
        assert_eq!(policy.max_interval(), ms(5000));
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.max_invocations(), 4);
    }

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy::exponential(5, ms(100), 2.0, Duration::from_secs(10)).unwrap();

        assert_eq!(policy.delay_for_attempt(1), ms(100));
        assert_eq!(policy.delay_for_attempt(2), ms(200));
        assert_eq!(policy.delay_for_attempt(3), ms(400));
        assert_eq!(policy.delay_for_attempt(4), ms(800));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy::exponential(10, ms(1000), 3.0, ms(5000)).unwrap();

        assert_eq!(policy.delay_for_attempt(2), ms(3000));
        assert_eq!(policy.delay_for_attempt(3), ms(5000));
        assert_eq!(policy.delay_for_attempt(9), ms(5000));
    }

    #[test]
    fn multiplier_of_one_is_flat_backoff() {
        let policy = RetryPolicy::exponential(3, ms(5000), 1.0, ms(5000)).unwrap();

        let delays: Vec<Duration> = (1..=3).map(|n| policy.delay_for_attempt(n)).collect();
        assert_eq!(delays, vec![ms(5000), ms(5000), ms(5000)]);
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let policy = RetryPolicy::exponential(u32::MAX, ms(1), 10.0, ms(60_000)).unwrap();
        assert_eq!(policy.delay_for_attempt(u32::MAX), ms(60_000));
    }

    #[test]
    fn attempt_zero_has_no_delay() {
        assert_eq!(RetryPolicy::default().delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn shrinking_or_nan_multipliers_are_rejected() {
        for bad in [0.5, 0.0, -2.0, f64::NAN, f64::INFINITY] {
            assert!(RetryPolicy::new(ms(1), bad, ms(10), 1).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn should_retry_counts_retries_after_first_invocation() {
        let policy = RetryPolicy::fixed(3, ms(1));

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn no_retry_stops_after_first_failure() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.should_retry(1));
        assert_eq!(policy.max_invocations(), 1);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: delays never shrink from one attempt to the next and never pass the cap.
            #[test]
            fn delays_are_monotonic_and_capped(
                initial in 0u64..20_000,
                multiplier in 1.0f64..8.0,
                max in 0u64..120_000,
                attempts in 1u32..64
            ) {
                let policy = RetryPolicy::new(ms(initial), multiplier, ms(max), attempts).unwrap();
                let mut previous = Duration::ZERO;
                for n in 1..=attempts {
                    let delay = policy.delay_for_attempt(n);
                    prop_assert!(delay >= previous, "attempt {} shrank: {:?} < {:?}", n, delay, previous);
                    prop_assert!(delay <= ms(max));
                    previous = delay;
                }
            }

            /// Property: with multiplier 1 every delay equals the initial interval (when under the cap).
            #[test]
            fn flat_backoff_ignores_attempt_number(
                initial in 0u64..60_000,
                attempt in 1u32..1_000
            ) {
                let policy = RetryPolicy::new(ms(initial), 1.0, ms(60_000), 10).unwrap();
                prop_assert_eq!(policy.delay_for_attempt(attempt), ms(initial));
            }
        }
    }
}
