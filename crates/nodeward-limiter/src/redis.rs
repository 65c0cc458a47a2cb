//! Redis-backed [`SharedStore`].
//!
//! Each user maps to a Redis set of source addresses with a TTL; every
//! observation is one atomic `SADD`/`EXPIRE`/`SCARD` pipeline.

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use redis::IntoConnectionInfo;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::config::RedisConfig;
use crate::error::LimiterError;
use crate::store::SharedStore;

/// Redis [`SharedStore`] with a per-command timeout.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisStore {
    /// Connect and verify the server answers within the configured timeout.
    pub async fn connect(config: &RedisConfig) -> Result<Self, LimiterError> {
        let mut info = format!("redis://{}/{}", config.addr, config.db).into_connection_info()?;
        info.redis.password = config.password.clone();
        let client = redis::Client::open(info)?;

        let timeout = config.timeout();
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| LimiterError::Timeout)??;

        let store = Self { conn, timeout };
        store.ping().await?;
        info!(addr = %config.addr, db = config.db, "redis device store connected");
        Ok(store)
    }

    async fn ping(&self) -> Result<(), LimiterError> {
        let mut conn = self.conn.clone();
        let _: String = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, LimiterError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(LimiterError::Timeout),
        }
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn observe(&self, key: &str, ip: IpAddr, ttl: Duration) -> Result<usize, LimiterError> {
        let mut conn = self.conn.clone();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .sadd(key, ip.to_string())
            .ignore()
            .expire(key, ttl_secs)
            .ignore()
            .scard(key);
        let (count,): (usize,) = self.bounded(pipe.query_async(&mut conn)).await?;
        Ok(count)
    }

    async fn members(&self, keys: &[String]) -> Result<Vec<HashSet<IpAddr>>, LimiterError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.smembers(key);
        }
        let raw: Vec<Vec<String>> = self.bounded(pipe.query_async(&mut conn)).await?;
        Ok(raw
            .into_iter()
            .map(|members| {
                members
                    .into_iter()
                    .filter_map(|m| match m.parse::<IpAddr>() {
                        Ok(ip) => Some(ip),
                        Err(_) => {
                            debug!(member = %m, "ignoring non-address member in device set");
                            None
                        }
                    })
                    .collect()
            })
            .collect())
    }
}
