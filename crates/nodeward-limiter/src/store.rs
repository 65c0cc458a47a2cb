//! Shared device store contract and an in-process implementation.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::LimiterError;

/// Eventually-consistent store of per-user device sets shared by a cluster.
///
/// Never a source of truth for local enforcement: callers treat every
/// error as "no information".
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Add `ip` to the set at `key`, refresh its TTL, and return the set size.
    async fn observe(&self, key: &str, ip: IpAddr, ttl: Duration) -> Result<usize, LimiterError>;

    /// Current members of each set in `keys`, in the same order.
    async fn members(&self, keys: &[String]) -> Result<Vec<HashSet<IpAddr>>, LimiterError>;
}

#[async_trait]
impl<S: SharedStore + ?Sized> SharedStore for Arc<S> {
    #[inline]
    async fn observe(&self, key: &str, ip: IpAddr, ttl: Duration) -> Result<usize, LimiterError> {
        (**self).observe(key, ip, ttl).await
    }

    #[inline]
    async fn members(&self, keys: &[String]) -> Result<Vec<HashSet<IpAddr>>, LimiterError> {
        (**self).members(keys).await
    }
}

#[derive(Debug)]
struct Entry {
    ips: HashSet<IpAddr>,
    expires_at: Instant,
}

/// In-process [`SharedStore`], for single-node setups and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sets: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `key` with addresses, as if another node had observed them.
    pub fn seed(&self, key: &str, ips: impl IntoIterator<Item = IpAddr>, ttl: Duration) {
        let mut sets = self.sets.lock();
        let entry = sets.entry(key.to_string()).or_insert_with(|| Entry {
            ips: HashSet::new(),
            expires_at: Instant::now() + ttl,
        });
        entry.ips.extend(ips);
        entry.expires_at = Instant::now() + ttl;
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn observe(&self, key: &str, ip: IpAddr, ttl: Duration) -> Result<usize, LimiterError> {
        let now = Instant::now();
        let mut sets = self.sets.lock();
        let entry = sets.entry(key.to_string()).or_insert_with(|| Entry {
            ips: HashSet::new(),
            expires_at: now + ttl,
        });
        if entry.expires_at <= now {
            entry.ips.clear();
        }
        entry.ips.insert(ip);
        entry.expires_at = now + ttl;
        Ok(entry.ips.len())
    }

    async fn members(&self, keys: &[String]) -> Result<Vec<HashSet<IpAddr>>, LimiterError> {
        let now = Instant::now();
        let sets = self.sets.lock();
        Ok(keys
            .iter()
            .map(|key| match sets.get(key) {
                Some(entry) if entry.expires_at > now => entry.ips.clone(),
                _ => HashSet::new(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn observe_counts_distinct_members() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        assert_eq!(store.observe("k", ip("10.0.0.1"), ttl).await.unwrap(), 1);
        assert_eq!(store.observe("k", ip("10.0.0.1"), ttl).await.unwrap(), 1);
        assert_eq!(store.observe("k", ip("10.0.0.2"), ttl).await.unwrap(), 2);
        assert_eq!(store.observe("other", ip("10.0.0.2"), ttl).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_sets_start_over() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);
        store.observe("k", ip("10.0.0.1"), ttl).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.members(&["k".to_string()]).await.unwrap()[0].is_empty());
        assert_eq!(store.observe("k", ip("10.0.0.2"), ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn members_preserves_key_order() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.seed("a", [ip("10.0.0.1")], ttl);
        store.seed("b", [ip("10.0.0.2"), ip("10.0.0.3")], ttl);
        let sets = store
            .members(&["b".to_string(), "missing".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert_eq!(sets[0].len(), 2);
        assert!(sets[1].is_empty());
        assert!(sets[2].contains(&ip("10.0.0.1")));
    }
}
