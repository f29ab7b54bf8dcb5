//! Reconnection policy.
//!
//! `delay(attempt) = min(base * 2^attempt + jitter, max)`. Everything is
//! deterministic except the jitter term, which comes from a [`JitterSource`]
//! so tests can pin it.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1_000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Supplies the random part of a backoff delay.
pub trait JitterSource: Send + Sync {
    /// A value in `[0, max)`.
    fn jitter(&self, max: Duration) -> Duration;
}

/// Uniform jitter from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn jitter(&self, max: Duration) -> Duration {
        let max_ms = max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn jitter(&self, _max: Duration) -> Duration {
        Duration::ZERO
    }
}

/// Always returns the same jitter, clamped below `max`.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub Duration);

impl JitterSource for FixedJitter {
    fn jitter(&self, max: Duration) -> Duration {
        if max.is_zero() {
            Duration::ZERO
        } else {
            self.0.min(max.saturating_sub(Duration::from_millis(1)))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    #[serde(with = "millis")]
    pub base_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    #[serde(with = "millis")]
    pub max_jitter: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^attempt, max)`, saturating for large attempts.
    pub fn delay_without_jitter(&self, attempt: u32) -> Duration {
        self.scaled(attempt).min(self.max_delay)
    }

    /// Delay before reconnection attempt number `attempt` (zero-based count of
    /// attempts already made since the last successful connect).
    pub fn delay(&self, attempt: u32, jitter: &dyn JitterSource) -> Duration {
        self.scaled(attempt)
            .saturating_add(jitter.jitter(self.max_jitter))
            .min(self.max_delay)
    }

    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    fn scaled(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor))
    }
}

/// `Duration` as integer milliseconds in config files.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delays_are_monotonic_and_capped() {
        let policy = ReconnectPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..10 {
            let delay = policy.delay_without_jitter(attempt);
            assert!(delay >= previous, "attempt {attempt} went backwards");
            assert!(delay <= DEFAULT_MAX_DELAY);
            previous = delay;
        }
    }

    #[test]
    fn delay_doubles_from_base() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(0, &NoJitter), Duration::from_secs(1));
        assert_eq!(policy.delay(1, &NoJitter), Duration::from_secs(2));
        assert_eq!(policy.delay(4, &NoJitter), Duration::from_secs(16));
    }

    #[test]
    fn delay_saturates_at_max_even_with_jitter() {
        let policy = ReconnectPolicy::default();
        let jitter = FixedJitter(Duration::from_millis(999));
        // 1000 * 2^5 = 32000 >= 30000
        assert_eq!(policy.delay(5, &jitter), DEFAULT_MAX_DELAY);
        assert_eq!(policy.delay(9, &jitter), DEFAULT_MAX_DELAY);
        assert_eq!(policy.delay(200, &jitter), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn jitter_is_added_below_the_cap() {
        let policy = ReconnectPolicy::default();
        let jitter = FixedJitter(Duration::from_millis(250));
        assert_eq!(policy.delay(2, &jitter), Duration::from_millis(4_250));
    }

    #[test]
    fn random_jitter_stays_in_range() {
        for _ in 0..100 {
            let j = RandomJitter.jitter(DEFAULT_MAX_JITTER);
            assert!(j < DEFAULT_MAX_JITTER);
        }
        assert_eq!(RandomJitter.jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn retry_stops_at_max_attempts() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(9));
        assert!(!policy.should_retry(10));
        assert!(!policy.should_retry(11));
    }
}
