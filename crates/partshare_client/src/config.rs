//! Configuration for the share client.

use partshare_protocol::HostConfig;
use std::time::Duration;

/// Configuration for a [`ShareClient`](crate::ShareClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Store root and application path.
    pub host: HostConfig,
    /// Retry configuration for authentication.
    pub retry: RetryConfig,
    /// How long to wait for a management record to reach a terminal state.
    pub watch_timeout: Duration,
}

impl ClientConfig {
    /// Creates a configuration for a store host.
    pub fn new(host: HostConfig) -> Self {
        Self {
            host,
            retry: RetryConfig::default(),
            watch_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the watch timeout.
    pub fn with_watch_timeout(mut self, timeout: Duration) -> Self {
        self.watch_timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

/// Backoff for authentication against an unreachable store.
///
/// Attempt `n` (counting from 1) waits `base_delay * factor^(n-2)` before it
/// is sent, capped at `max_delay`, plus up to `jitter` of that delay at
/// random. The first attempt never waits.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts in total, the first one included.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub base_delay: Duration,
    /// Upper bound of any single wait, jitter excluded.
    pub max_delay: Duration,
    /// Growth of the wait per attempt.
    pub factor: u32,
    /// Random extra wait as a fraction of the delay. Zero disables it.
    pub jitter: f64,
}

impl RetryConfig {
    /// Up to `max_attempts` attempts, doubling from 100ms.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            factor: 2,
            jitter: 0.25,
        }
    }

    /// A single attempt.
    pub fn no_retry() -> Self {
        Self {
            jitter: 0.0,
            ..Self::new(1)
        }
    }

    /// Sets the wait before the second attempt.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Caps every wait.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor. `1` keeps the wait constant.
    pub fn with_factor(mut self, factor: u32) -> Self {
        self.factor = factor.max(1);
        self
    }

    /// Sets the jitter fraction, clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Returns true if another attempt may follow attempt number `attempt`.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Wait before sending attempt number `attempt`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let growth = self.factor.saturating_pow(attempt - 2);
        let delay = self.base_delay.saturating_mul(growth).min(self.max_delay);
        if self.jitter > 0.0 {
            delay + delay.mul_f64(self.jitter * rand::random::<f64>())
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builder() {
        let config = ClientConfig::new(HostConfig::new("10.0.0.2", 9000))
            .with_retry(RetryConfig::no_retry())
            .with_watch_timeout(Duration::from_secs(2));

        assert_eq!(config.host.root, "partshare://10.0.0.2:9000/");
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.watch_timeout, Duration::from_secs(2));
    }

    #[test]
    fn default_retry_is_three_attempts() {
        assert_eq!(ClientConfig::default().retry.max_attempts, 3);
    }

    #[test]
    fn first_attempt_never_waits() {
        let retry = RetryConfig::new(5);
        assert_eq!(retry.delay_before(0), Duration::ZERO);
        assert_eq!(retry.delay_before(1), Duration::ZERO);
    }

    #[test]
    fn delays_grow_then_cap() {
        let retry = RetryConfig::new(6)
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(50))
            .with_jitter(0.0);
        let waits: Vec<_> = (2..=6).map(|n| retry.delay_before(n)).collect();
        assert_eq!(
            waits,
            [10, 20, 40, 50, 50].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let retry = RetryConfig::new(3).with_base_delay(Duration::from_millis(100));
        for _ in 0..50 {
            let wait = retry.delay_before(2);
            assert!(wait >= Duration::from_millis(100));
            assert!(wait <= Duration::from_millis(125));
        }
    }

    #[test]
    fn attempt_budget() {
        let retry = RetryConfig::new(3);
        assert!(retry.allows_retry(1));
        assert!(retry.allows_retry(2));
        assert!(!retry.allows_retry(3));
        assert!(!RetryConfig::no_retry().allows_retry(1));
        assert_eq!(RetryConfig::new(0).max_attempts, 1);
        assert_eq!(RetryConfig::new(2).with_factor(0).factor, 1);
    }
}
