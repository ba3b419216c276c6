//! Node configuration.

use std::str::FromStr;
use std::time::Duration;

use vsl_locking::LockConfig;
use vsl_sync::SyncConfig;

use crate::error::{Error, Result};

/// Configuration for a [`VslNode`](crate::VslNode).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Identity of this agent; also the first segment of its addresses.
    pub agent_id: String,

    pub lock: LockConfig,

    pub sync: SyncConfig,

    /// How long shutdown waits for each background loop.
    pub shutdown_grace: Duration,
}

impl NodeConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            lock: LockConfig::default(),
            sync: SyncConfig::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    #[must_use]
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Create config from `VSL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup. Unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let agent_id = lookup("VSL_AGENT_ID")
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && !id.contains('/'))
            .ok_or_else(|| Error::Config("VSL_AGENT_ID must be set to a non-empty id without '/'".into()))?;

        let lock = LockConfig::default()
            .with_validity(Duration::from_secs(parse(&lookup, "VSL_LOCK_EXPIRATION_SECS", 60)?))
            .with_warning_threshold(Duration::from_secs(parse(&lookup, "VSL_LOCK_WARNING_SECS", 10)?))
            .with_sweep_interval(Duration::from_millis(parse(&lookup, "VSL_LOCK_SWEEP_INTERVAL_MS", 1000)?));
        if lock.sweep_interval.is_zero() {
            return Err(Error::Config("VSL_LOCK_SWEEP_INTERVAL_MS must be greater than zero".into()));
        }
        if lock.warning_threshold > lock.validity {
            return Err(Error::Config(
                "VSL_LOCK_WARNING_SECS exceeds VSL_LOCK_EXPIRATION_SECS".into(),
            ));
        }

        let sync = SyncConfig::default()
            .with_update_cache_max_age(Duration::from_millis(parse(&lookup, "VSL_UPDATE_CACHE_MAX_AGE_MS", 60_000)?))
            .with_group_key_cache_max_age(Duration::from_millis(parse(&lookup, "VSL_GROUP_KEY_CACHE_MAX_AGE_MS", 60_000)?))
            .with_sync_interval(Duration::from_millis(parse(&lookup, "VSL_SYNC_INTERVAL_MS", 1000)?))
            .with_handshake_timeout(Duration::from_millis(parse(&lookup, "VSL_HANDSHAKE_TIMEOUT_MS", 5000)?));

        if sync.sync_interval.is_zero() {
            return Err(Error::Config("VSL_SYNC_INTERVAL_MS must be greater than zero".into()));
        }

        Ok(Self::new(agent_id).with_lock(lock).with_sync(sync))
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {key}={raw:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = NodeConfig::from_lookup(lookup(&[("VSL_AGENT_ID", "k1")])).unwrap();
        assert_eq!(config.agent_id, "k1");
        assert_eq!(config.lock.validity, Duration::from_secs(60));
        assert_eq!(config.lock.warning_threshold, Duration::from_secs(10));
        assert_eq!(config.lock.sweep_interval, Duration::from_secs(1));
        assert_eq!(config.sync.update_cache_max_age, Duration::from_secs(60));
        assert_eq!(config.sync.handshake_timeout, Duration::from_secs(5));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("VSL_AGENT_ID", " k2 "),
            ("VSL_LOCK_EXPIRATION_SECS", "30"),
            ("VSL_LOCK_WARNING_SECS", "5"),
            ("VSL_UPDATE_CACHE_MAX_AGE_MS", "1500"),
            ("VSL_SYNC_INTERVAL_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.agent_id, "k2");
        assert_eq!(config.lock.validity, Duration::from_secs(30));
        assert_eq!(config.lock.warning_threshold, Duration::from_secs(5));
        assert_eq!(config.sync.update_cache_max_age, Duration::from_millis(1500));
        assert_eq!(config.sync.sync_interval, Duration::from_millis(250));
    }

    #[test]
    fn missing_agent_id_is_an_error() {
        let err = NodeConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(NodeConfig::from_lookup(lookup(&[("VSL_AGENT_ID", "a/b")])).is_err());
    }

    #[test]
    fn malformed_numbers_are_errors() {
        let err = NodeConfig::from_lookup(lookup(&[
            ("VSL_AGENT_ID", "k1"),
            ("VSL_LOCK_EXPIRATION_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("VSL_LOCK_EXPIRATION_SECS"));
    }

    #[test]
    fn warning_must_fit_in_validity() {
        let err = NodeConfig::from_lookup(lookup(&[
            ("VSL_AGENT_ID", "k1"),
            ("VSL_LOCK_EXPIRATION_SECS", "5"),
            ("VSL_LOCK_WARNING_SECS", "10"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_intervals_are_errors() {
        for key in ["VSL_LOCK_SWEEP_INTERVAL_MS", "VSL_SYNC_INTERVAL_MS"] {
            let err = NodeConfig::from_lookup(lookup(&[("VSL_AGENT_ID", "k1"), (key, "0")])).unwrap_err();
            assert!(matches!(err, Error::Config(_)));
            assert!(err.to_string().contains(key), "{err}");
        }
    }
}
