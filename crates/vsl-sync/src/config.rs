//! Sync coordinator configuration.

use std::time::Duration;

/// Cipher suite announced with freshly generated group keys.
pub const DEFAULT_CIPHER_SUITE: &str = "AES-256-GCM";

/// Configuration for a [`GroupSyncCoordinator`](crate::GroupSyncCoordinator).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Period of the coordinator loop (key redelivery, then handshake scan).
    pub sync_interval: Duration,

    /// Bounded wait for one handshake round trip.
    pub handshake_timeout: Duration,

    /// Cached out-of-order updates older than this are never applied.
    pub update_cache_max_age: Duration,

    /// Period of the replay-cache eviction sweep.
    pub cache_sweep_interval: Duration,

    /// Undelivered group keys are dropped after this long.
    pub group_key_cache_max_age: Duration,

    /// Length of generated group keys in bytes.
    pub group_key_len: usize,

    pub cipher_suite: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(5),
            update_cache_max_age: Duration::from_millis(60_000),
            cache_sweep_interval: Duration::from_secs(1),
            group_key_cache_max_age: Duration::from_secs(60),
            group_key_len: 32,
            cipher_suite: DEFAULT_CIPHER_SUITE.to_string(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_update_cache_max_age(mut self, max_age: Duration) -> Self {
        self.update_cache_max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_cache_sweep_interval(mut self, interval: Duration) -> Self {
        self.cache_sweep_interval = interval;
        self
    }

    #[must_use]
    pub fn with_group_key_cache_max_age(mut self, max_age: Duration) -> Self {
        self.group_key_cache_max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_cipher_suite(mut self, cipher_suite: impl Into<String>) -> Self {
        self.cipher_suite = cipher_suite.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.update_cache_max_age, Duration::from_secs(60));
        assert_eq!(config.group_key_cache_max_age, Duration::from_secs(60));
        assert_eq!(config.group_key_len, 32);
        assert_eq!(config.cipher_suite, DEFAULT_CIPHER_SUITE);
    }

    #[test]
    fn builders_override() {
        let config = SyncConfig::default()
            .with_handshake_timeout(Duration::from_millis(200))
            .with_cipher_suite("test-suite");
        assert_eq!(config.handshake_timeout, Duration::from_millis(200));
        assert_eq!(config.cipher_suite, "test-suite");
    }
}
