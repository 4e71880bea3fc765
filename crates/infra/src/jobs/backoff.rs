//! Exponential backoff for retried store calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff policy: `initial_delay * 2^(attempt - 1)`, capped at `max_delay`.
///
/// There is no attempt limit; callers stop retrying on cancellation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }

    /// Constant delay between retries.
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay)
    }

    /// Calculate delay for a given retry number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        // 2^31 already exceeds any sensible cap; clamp the shift to avoid overflow.
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(10));

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped() {
        let policy = BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(2));

        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = BackoffPolicy::fixed(Duration::from_millis(250));

        for attempt in 1..6 {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_millis(250));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the Nth retry waits min(d0 * 2^(N-1), dmax).
        #[test]
        fn nth_delay_matches_closed_form(
            d0_ms in 1u64..5_000,
            max_ms in 1u64..600_000,
            attempt in 1u32..40,
        ) {
            let policy = BackoffPolicy::new(
                Duration::from_millis(d0_ms),
                Duration::from_millis(max_ms),
            );

            let uncapped = (d0_ms as u128) << (attempt - 1);
            let expected = uncapped.min(max_ms as u128) as u64;

            prop_assert_eq!(policy.delay_for_attempt(attempt), Duration::from_millis(expected));
        }

        /// Delays never shrink from one retry to the next.
        #[test]
        fn delays_are_monotonic(d0_ms in 1u64..5_000, attempt in 1u32..60) {
            let policy = BackoffPolicy::new(Duration::from_millis(d0_ms), Duration::from_secs(60));
            prop_assert!(policy.delay_for_attempt(attempt) <= policy.delay_for_attempt(attempt + 1));
        }
    }
}
