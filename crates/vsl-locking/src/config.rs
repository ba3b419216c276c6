//! Lock table configuration.

use std::time::Duration;

/// Configuration for a [`LockTable`](crate::LockTable) and its sweeper.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// How long a lock stays valid after acquisition.
    pub validity: Duration,

    /// Holders are warned once remaining validity drops to this value.
    pub warning_threshold: Duration,

    /// Period of the expiration sweeper.
    pub sweep_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            validity: Duration::from_secs(60),
            warning_threshold: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl LockConfig {
    #[must_use]
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    #[must_use]
    pub fn with_warning_threshold(mut self, threshold: Duration) -> Self {
        self.warning_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}
