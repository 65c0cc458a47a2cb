//! Cluster-wide device limit.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use nodeward_core::user_key;
use tracing::{debug, warn};

use crate::config::RedisConfig;
use crate::error::LimiterError;
use crate::store::SharedStore;
use crate::table::{InboundLimitTable, UserLimit};

/// Mirrors device observations into a [`SharedStore`].
///
/// Observation is fire-and-forget: the admission path spawns it and moves
/// on. The count it returns flags the user on the local table, so the
/// cluster-wide cap takes effect from the next new address onward. Store
/// failures never reject anything.
#[derive(Clone)]
pub struct GlobalDeviceLimit {
    store: Arc<dyn SharedStore>,
    key_prefix: String,
    expiry: Duration,
}

impl GlobalDeviceLimit {
    pub fn new(store: Arc<dyn SharedStore>, key_prefix: impl Into<String>, expiry: Duration) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            expiry,
        }
    }

    /// Connect to Redis as described by `config`. Returns `None` when disabled.
    #[cfg(feature = "redis")]
    pub async fn from_config(config: &RedisConfig) -> Result<Option<Self>, LimiterError> {
        if !config.enable {
            return Ok(None);
        }
        let store = crate::redis::RedisStore::connect(config).await?;
        Ok(Some(Self::new(
            Arc::new(store),
            config.key_prefix.clone(),
            config.expiry(),
        )))
    }

    /// Without Redis support an enabled config is a configuration error.
    #[cfg(not(feature = "redis"))]
    pub async fn from_config(config: &RedisConfig) -> Result<Option<Self>, LimiterError> {
        if !config.enable {
            return Ok(None);
        }
        Err(LimiterError::Store("built without redis support".to_string()))
    }

    /// Store key for a user tag. The node tag is stripped so every node
    /// serving the same user shares one set.
    pub fn store_key(&self, user_tag: &str) -> String {
        format!("{}{}", self.key_prefix, user_key(user_tag))
    }

    pub(crate) fn observe(
        &self,
        table: Arc<InboundLimitTable>,
        user_tag: &str,
        limit: UserLimit,
        ip: IpAddr,
    ) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(tag = table.tag(), "no runtime, skipping global device observation");
            return;
        };
        let store = Arc::clone(&self.store);
        let key = self.store_key(user_tag);
        let user_tag = user_tag.to_string();
        let expiry = self.expiry;

        handle.spawn(async move {
            match store.observe(&key, ip, expiry).await {
                Ok(count) => {
                    let over = limit.device_limit > 0 && count > limit.device_limit as usize;
                    if over && !table.is_over_global(&user_tag) {
                        debug!(tag = table.tag(), uid = limit.uid, count, "global device limit reached");
                    }
                    table.set_over_global(&user_tag, over);
                }
                Err(e) => {
                    warn!(tag = table.tag(), error = %e, "global device observation failed");
                }
            }
        });
    }

    /// Pull cluster-wide device sets for every user on `table` and merge
    /// them into the local online sets. Returns the number of new addresses.
    pub async fn sync(&self, table: &InboundLimitTable) -> Result<usize, LimiterError> {
        let users = table.users();
        if users.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = users.iter().map(|(tag, _)| self.store_key(tag)).collect();
        let sets = self.store.members(&keys).await?;

        let mut merged = 0;
        for ((user_tag, limit), ips) in users.iter().zip(sets) {
            if ips.is_empty() {
                continue;
            }
            merged += table.merge_online(user_tag, limit.uid, ips);
        }
        Ok(merged)
    }
}

impl std::fmt::Debug for GlobalDeviceLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalDeviceLimit")
            .field("key_prefix", &self.key_prefix)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}
