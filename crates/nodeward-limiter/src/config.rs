//! Limiter configuration.

use std::time::Duration;

use nodeward_core::{
    DEFAULT_REDIS_ADDR, DEFAULT_REDIS_EXPIRY_SECS, DEFAULT_REDIS_KEY_PREFIX,
    DEFAULT_REDIS_TIMEOUT_SECS,
};
use serde::Deserialize;

/// What [`Limiter::admit`](crate::Limiter::admit) does for a tag it has no table for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingTablePolicy {
    /// Admit without limits.
    #[default]
    Allow,
    /// Reject the connection.
    Reject,
}

/// Cluster-wide device limit backed by Redis.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub enable: bool,

    /// `host:port`.
    #[serde(default = "default_addr")]
    pub addr: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub db: i64,

    /// Per-command timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// TTL of a user's device set in seconds.
    #[serde(default = "default_expiry_secs")]
    pub expiry_secs: u64,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enable: false,
            addr: default_addr(),
            password: None,
            db: 0,
            timeout_secs: default_timeout_secs(),
            expiry_secs: default_expiry_secs(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_addr() -> String {
    DEFAULT_REDIS_ADDR.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_REDIS_TIMEOUT_SECS
}

fn default_expiry_secs() -> u64 {
    DEFAULT_REDIS_EXPIRY_SECS
}

fn default_key_prefix() -> String {
    DEFAULT_REDIS_KEY_PREFIX.to_string()
}
