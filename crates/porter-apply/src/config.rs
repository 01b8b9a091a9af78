//! Engine configuration

use crate::retry::RetryPolicy;
use std::time::Duration;

/// Apply engine settings
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyConfig {
    /// Maximum concurrently running actions
    pub max_parallel: usize,
    pub retry: RetryPolicy,
    /// Deadline for a single executor call
    pub call_timeout: Duration,
    /// Dispatch pauses while the remaining rate budget is at or below this
    pub rate_reserve: u32,
}

impl ApplyConfig {
    /// Default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With worker pool size (at least one)
    #[inline]
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// With per-call timeout
    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// With rate reserve
    #[inline]
    #[must_use]
    pub fn with_rate_reserve(mut self, rate_reserve: u32) -> Self {
        self.rate_reserve = rate_reserve;
        self
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(30),
            rate_reserve: 0,
        }
    }
}
