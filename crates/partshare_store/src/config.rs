//! Store configuration.

use partshare_protocol::HostConfig;
use rand::RngCore;
use std::time::Duration;

/// Configuration for the store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root URL and application path of every partition.
    pub host: HostConfig,
    /// Secret key for HMAC token signatures.
    pub secret: Vec<u8>,
    /// Time the pipeline spends on each management record.
    pub processing_delay: Duration,
    /// Lifetime of an access token.
    pub session_expiry: Duration,
}

impl StoreConfig {
    /// Creates a configuration for a host with a random secret.
    pub fn new(host: HostConfig) -> Self {
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);

        Self {
            host,
            secret,
            processing_delay: Duration::from_millis(50),
            session_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the signing secret.
    pub fn with_secret(mut self, secret: Vec<u8>) -> Self {
        self.secret = secret;
        self
    }

    /// Sets the per-record processing delay.
    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = delay;
        self
    }

    /// Sets the access token lifetime.
    pub fn with_session_expiry(mut self, expiry: Duration) -> Self {
        self.session_expiry = expiry;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.host, HostConfig::default());
        assert_eq!(config.secret.len(), 32);
        assert_eq!(config.session_expiry, Duration::from_secs(86_400));
    }

    #[test]
    fn config_builder() {
        let config = StoreConfig::new(HostConfig::new("10.0.0.1", 9000))
            .with_secret(vec![1, 2, 3])
            .with_processing_delay(Duration::ZERO)
            .with_session_expiry(Duration::from_secs(60));

        assert_eq!(config.host.root, "partshare://10.0.0.1:9000/");
        assert_eq!(config.secret, vec![1, 2, 3]);
        assert_eq!(config.processing_delay, Duration::ZERO);
        assert_eq!(config.session_expiry, Duration::from_secs(60));
    }

    #[test]
    fn secrets_differ_per_instance() {
        assert_ne!(StoreConfig::default().secret, StoreConfig::default().secret);
    }
}
