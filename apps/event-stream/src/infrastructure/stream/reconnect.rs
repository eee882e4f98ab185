//! Reconnection Policy
//!
//! Bounded exponential backoff for reconnecting the event stream.
//!
//! The delay for a given attempt is `min(base * 2^attempt, cap)`, with attempt
//! 0 being the first retry. Optional jitter only ever lengthens a delay and is
//! clamped back to the cap, so the delay sequence stays non-decreasing.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Upward jitter as a fraction of the delay, in `[0, 1]` (0 = none).
    pub jitter_factor: f64,
    /// Maximum number of reconnection attempts before failing permanently.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(
        base_delay: Duration,
        max_delay: Duration,
        jitter_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_factor,
            max_attempts,
        }
    }
}

/// Exponential backoff policy.
///
/// The policy holds no attempt state; the connection manager owns the
/// counter and passes it in.
///
/// # Example
///
/// ```rust
/// use event_stream::infrastructure::stream::reconnect::{BackoffPolicy, ReconnectConfig};
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.delay(0), Duration::from_secs(1));
/// assert_eq!(policy.delay(3), Duration::from_secs(8));
/// assert_eq!(policy.delay(10), Duration::from_secs(30));
///
/// assert!(policy.next_delay(4).is_some());
/// assert!(policy.next_delay(5).is_none());
/// ```
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: ReconnectConfig,
}

impl BackoffPolicy {
    /// Create a new backoff policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    /// Deterministic delay for an attempt: `min(base * 2^attempt, cap)`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.config.base_delay.checked_mul(factor))
            .map_or(self.config.max_delay, |delay| {
                delay.min(self.config.max_delay)
            })
    }

    /// Delay for an attempt with upward jitter applied, never above the cap.
    ///
    /// A non-finite or non-positive jitter factor disables jitter.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        let factor = self.config.jitter_factor;
        if !factor.is_finite() || factor <= 0.0 {
            return delay;
        }

        let extra: f64 = rand::rng().random_range(0.0..=factor.min(1.0));
        delay.mul_f64(1.0 + extra).min(self.config.max_delay)
    }

    /// Delay before the given attempt, or `None` once the budget is spent.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        self.should_retry(attempt)
            .then(|| self.jittered_delay(attempt))
    }

    /// Check if another reconnection attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.config.max_attempts
    }

    /// Maximum number of reconnection attempts.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(ReconnectConfig::default())
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.jitter_factor.abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 5);
    }

    #[test_case(0, 1 ; "first retry")]
    #[test_case(1, 2 ; "second retry")]
    #[test_case(2, 4 ; "third retry")]
    #[test_case(3, 8 ; "fourth retry")]
    #[test_case(4, 16 ; "fifth retry")]
    #[test_case(5, 30 ; "capped")]
    #[test_case(31, 30 ; "large attempt")]
    #[test_case(64, 30 ; "overflowing attempt")]
    fn delay_doubles_until_cap(attempt: u32, expected_secs: u64) {
        assert_eq!(policy().delay(attempt), Duration::from_secs(expected_secs));
    }

    #[test]
    fn custom_base_and_cap() {
        let policy = BackoffPolicy::new(ReconnectConfig::new(
            Duration::from_millis(100),
            Duration::from_millis(250),
            0.0,
            10,
        ));

        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(250));
    }

    #[test]
    fn next_delay_stops_at_max_attempts() {
        let policy = BackoffPolicy::new(ReconnectConfig {
            max_attempts: 3,
            ..Default::default()
        });

        assert_eq!(policy.next_delay(0), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(4)));
        assert_eq!(policy.next_delay(3), None);
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn zero_max_attempts_never_retries() {
        let policy = BackoffPolicy::new(ReconnectConfig {
            max_attempts: 0,
            ..Default::default()
        });
        assert!(policy.next_delay(0).is_none());
    }

    #[test]
    fn jitter_bounds() {
        let policy = BackoffPolicy::new(ReconnectConfig {
            jitter_factor: 0.1,
            ..Default::default()
        });

        for _ in 0..100 {
            let millis = policy.jittered_delay(0).as_millis();
            assert!(millis >= 1000, "delay {millis}ms is below base 1000ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }

        for _ in 0..100 {
            assert_eq!(policy.jittered_delay(8), Duration::from_secs(30));
        }
    }

    #[test_case(f64::NAN ; "nan")]
    #[test_case(f64::INFINITY ; "infinite")]
    #[test_case(f64::NEG_INFINITY ; "negative infinite")]
    #[test_case(-0.5 ; "negative")]
    fn unusable_jitter_is_ignored(jitter: f64) {
        let policy = BackoffPolicy::new(ReconnectConfig {
            jitter_factor: jitter,
            ..Default::default()
        });

        assert_eq!(policy.jittered_delay(0), Duration::from_secs(1));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(4)));
        assert_eq!(policy.jittered_delay(9), Duration::from_secs(30));
    }

    #[test]
    fn jitter_above_one_is_clamped() {
        let policy = BackoffPolicy::new(ReconnectConfig {
            jitter_factor: 5.0,
            ..Default::default()
        });

        for _ in 0..100 {
            let millis = policy.jittered_delay(0).as_millis();
            assert!((1000..=2000).contains(&millis), "delay {millis}ms out of range");
        }
    }

    proptest! {
        #[test]
        fn delay_matches_formula(attempt in 0u32..40) {
            let expected = 2u64
                .checked_pow(attempt)
                .map_or(30, |factor| factor.min(30));
            prop_assert_eq!(policy().delay(attempt), Duration::from_secs(expected));
        }

        #[test]
        fn delay_is_non_decreasing_and_capped(attempt in 0u32..200) {
            let policy = policy();
            prop_assert!(policy.delay(attempt) <= policy.delay(attempt + 1));
            prop_assert!(policy.delay(attempt) <= Duration::from_secs(30));
        }

        #[test]
        fn jittered_sequence_is_non_decreasing(attempt in 0u32..12, jitter in 0.0f64..=1.0) {
            let policy = BackoffPolicy::new(ReconnectConfig {
                jitter_factor: jitter,
                ..Default::default()
            });
            let current = policy.jittered_delay(attempt);
            let next = policy.jittered_delay(attempt + 1);
            prop_assert!(current <= next);
            prop_assert!(current <= Duration::from_secs(30));
        }
    }
}
