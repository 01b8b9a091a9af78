//! Retry policy: exponential backoff with jitter

use rand::Rng;
use std::time::Duration;

/// Backoff schedule for retryable failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempt cap, first attempt included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random extra fraction added to each delay (0.0 to 1.0)
    pub jitter: f64,
    /// Rate-limit pauses tolerated per action; these never count as attempts
    pub max_rate_limit_waits: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
            max_rate_limit_waits: 10,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// With attempt cap (at least one)
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// With base and maximum delay
    #[inline]
    #[must_use]
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max.max(base);
        self
    }

    /// With jitter fraction, clamped to `[0, 1]`
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// With rate-limit wait cap (at least one)
    #[inline]
    #[must_use]
    pub fn with_max_rate_limit_waits(mut self, waits: u32) -> Self {
        self.max_rate_limit_waits = waits.max(1);
        self
    }

    /// Whether the action may wait out another rate limit after `waits` pauses
    #[inline]
    #[must_use]
    pub fn allows_rate_limit_wait(&self, waits: u32) -> bool {
        waits < self.max_rate_limit_waits
    }

    /// Whether another attempt is allowed after `attempts` counted attempts
    #[inline]
    #[must_use]
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Deterministic delay before the retry that follows attempt `attempt`
    ///
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Delay with jitter applied
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = rand::rng().random_range(0.0..=self.jitter);
        delay.mul_f64(1.0 + extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let policy = RetryPolicy::default()
            .with_delays(Duration::from_millis(100), Duration::from_millis(700))
            .with_jitter(0.0);
        let delays: Vec<_> = (1..=5).map(|a| policy.delay_for(a).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 700, 700]);
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(u32::MAX), policy.max_delay);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default()
            .with_delays(Duration::from_secs(1), Duration::from_secs(10))
            .with_jitter(0.5);
        for _ in 0..100 {
            let d = policy.backoff(1);
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_millis(1500), "{d:?}");
        }
    }

    #[test]
    fn attempt_cap() {
        let policy = RetryPolicy::default().with_max_attempts(3);
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert!(!RetryPolicy::no_retry().allows_retry(1));
    }

    #[test]
    fn rate_limit_waits_are_capped_separately() {
        let policy = RetryPolicy::no_retry().with_max_rate_limit_waits(2);
        assert!(policy.allows_rate_limit_wait(1));
        assert!(!policy.allows_rate_limit_wait(2));
        assert!(!policy.allows_retry(1));
        assert_eq!(RetryPolicy::default().with_max_rate_limit_waits(0).max_rate_limit_waits, 1);
    }
}
