//! Connection parameters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// What a pool does when every connection is checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPolicy {
    /// Wait up to the acquire timeout for a connection to be released.
    Block,
    /// Fail immediately.
    FailFast,
}

/// Parameters for opening native connections to one store.
///
/// The `location` is interpreted by the driver:
/// - relational: `memory:<name>` for a shared in-memory database, or a file path
/// - object storage: bucket name
/// - search index: cluster/index namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Driver-specific location.
    pub location: String,

    /// Remote host, when the driver talks to one.
    pub host: Option<String>,

    /// Reference into the credential vault; never the secret itself.
    pub credentials_ref: Option<String>,

    /// Maximum number of native connections held by the pool.
    pub pool_size: usize,

    /// How long a blocked acquire waits, in milliseconds.
    pub acquire_timeout_ms: u64,

    /// Behaviour when the pool is exhausted.
    pub pool_policy: PoolPolicy,

    /// Free-form driver options.
    pub options: BTreeMap<String, String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            location: String::new(),
            host: None,
            credentials_ref: None,
            pool_size: 4,
            acquire_timeout_ms: 5_000,
            pool_policy: PoolPolicy::Block,
            options: BTreeMap::new(),
        }
    }
}

impl ConnectionConfig {
    /// Creates a configuration for the given location with default pool settings.
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Self::default()
        }
    }

    /// Sets the remote host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the credential reference.
    #[must_use]
    pub fn credentials_ref(mut self, reference: impl Into<String>) -> Self {
        self.credentials_ref = Some(reference.into());
        self
    }

    /// Sets the maximum pool size.
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Sets the acquire timeout.
    #[must_use]
    pub fn acquire_timeout_ms(mut self, millis: u64) -> Self {
        self.acquire_timeout_ms = millis;
        self
    }

    /// Sets the exhaustion policy.
    #[must_use]
    pub fn pool_policy(mut self, policy: PoolPolicy) -> Self {
        self.pool_policy = policy;
        self
    }

    /// Adds a driver option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Returns the acquire timeout as a duration.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.pool_policy, PoolPolicy::Block);
        assert!(config.credentials_ref.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = ConnectionConfig::new("memory:orders")
            .pool_size(2)
            .pool_policy(PoolPolicy::FailFast)
            .credentials_ref("vault://orders")
            .option("busy_timeout_ms", "250");

        assert_eq!(config.location, "memory:orders");
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.pool_policy, PoolPolicy::FailFast);
        assert_eq!(config.options["busy_timeout_ms"], "250");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"location":"bucket-a","pool_size":1}"#).unwrap();
        assert_eq!(config.location, "bucket-a");
        assert_eq!(config.pool_size, 1);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(5));
    }
}
