//! Retry policy with capped exponential backoff

use std::time::Duration;

use rand::Rng;

/// Per-stage retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Maximum random offset applied either way
    pub jitter: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter: Duration::from_millis(250),
            max_delay: Duration::from_millis(60_000),
        }
    }
}

impl RetryPolicy {
    /// Whether a stage that has failed `attempts` times may run again
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the retry following failed attempt `attempt` (1-based),
    /// without jitter
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.max(1.0).powi(exponent);
        let cap = self.max_delay.as_millis() as f64;
        if !millis.is_finite() || millis >= cap {
            return self.max_delay;
        }
        Duration::from_millis(millis as u64)
    }

    /// Nominal delay with jitter, never above `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        let jitter = self.jitter.as_millis() as i64;
        if jitter == 0 {
            return nominal;
        }

        let offset = rand::thread_rng().gen_range(-jitter..=jitter);
        let millis = (nominal.as_millis() as i64 + offset).max(0) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_exponential_growth() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_is_capped_and_non_decreasing() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(10),
            ..policy()
        };

        let mut previous = Duration::ZERO;
        for attempt in 1..200 {
            let delay = policy.nominal_delay(attempt);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(10));
            previous = delay;
        }
        assert_eq!(policy.nominal_delay(199), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for(2);
            assert!(delay >= Duration::from_millis(1750));
            assert!(delay <= Duration::from_millis(2250));
        }
    }

    #[test]
    fn test_allows_retry() {
        let policy = policy();
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }
}
