//! Admission decisions across all inbounds.

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use nodeward_core::{OnlineUser, UserInfo, metrics, parse_user_tag_uid};
use tracing::debug;

use crate::bucket::RateBucket;
use crate::config::MissingTablePolicy;
use crate::error::LimiterError;
use crate::global::GlobalDeviceLimit;
use crate::table::{DeviceCheck, InboundLimitTable, UserLimit};

/// Effective rate: the smaller of two limits, where 0 means "no limit".
///
/// If either side is 0 the other wins; if both are 0 the result is 0.
pub fn determine_rate(node_limit: u64, user_limit: u64) -> u64 {
    match (node_limit, user_limit) {
        (0, user) => user,
        (node, 0) => node,
        (node, user) => node.min(user),
    }
}

/// Result of [`Limiter::admit`].
#[derive(Debug, Clone, Default)]
pub struct Admission {
    /// Bucket the data plane must draw from, when throttled.
    pub bucket: Option<Arc<RateBucket>>,
    /// True iff the effective rate is non-zero.
    pub throttle: bool,
    /// Drop the connection.
    pub reject: bool,
}

impl Admission {
    fn unrestricted() -> Self {
        Self::default()
    }

    fn rejected() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }
}

/// Owns one [`InboundLimitTable`] per live inbound tag.
#[derive(Debug, Default)]
pub struct Limiter {
    tables: DashMap<String, Arc<InboundLimitTable>>,
    missing_table_policy: MissingTablePolicy,
}

impl Limiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_missing_table_policy(mut self, policy: MissingTablePolicy) -> Self {
        self.missing_table_policy = policy;
        self
    }

    /// Install (or replace) the table for `tag`.
    pub fn add_inbound(&self, tag: &str, node_speed_limit: u64, users: &[UserInfo]) {
        self.add_inbound_with_global(tag, node_speed_limit, users, None);
    }

    /// Install (or replace) the table for `tag`, mirroring device
    /// observations to `global` when given.
    pub fn add_inbound_with_global(
        &self,
        tag: &str,
        node_speed_limit: u64,
        users: &[UserInfo],
        global: Option<GlobalDeviceLimit>,
    ) {
        let mut table = InboundLimitTable::new(tag, node_speed_limit, users);
        if let Some(global) = global {
            table = table.with_global(global);
        }
        metrics::set_active_users(tag, table.user_count());
        self.tables.insert(tag.to_string(), Arc::new(table));
    }

    /// Drop the table for `tag`. Returns whether one existed.
    pub fn remove_inbound(&self, tag: &str) -> bool {
        self.tables.remove(tag).is_some()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tables.contains_key(tag)
    }

    pub fn table(&self, tag: &str) -> Option<Arc<InboundLimitTable>> {
        self.tables.get(tag).map(|t| Arc::clone(&t))
    }

    fn require(&self, tag: &str) -> Result<Arc<InboundLimitTable>, LimiterError> {
        self.table(tag)
            .ok_or_else(|| LimiterError::NoSuchInbound(tag.to_string()))
    }

    /// Replace the configuration of changed users, invalidating stale buckets.
    pub fn update_inbound(&self, tag: &str, changed: &[UserInfo]) -> Result<(), LimiterError> {
        let table = self.require(tag)?;
        table.upsert_users(changed);
        metrics::set_active_users(tag, table.user_count());
        Ok(())
    }

    /// Remove users by user tag.
    pub fn remove_users(&self, tag: &str, user_tags: &[String]) -> Result<(), LimiterError> {
        let table = self.require(tag)?;
        table.remove_users(user_tags);
        metrics::set_active_users(tag, table.user_count());
        Ok(())
    }

    /// Decide whether a new connection from `ip` for `user_tag` may proceed,
    /// and with which bucket.
    pub fn admit(&self, tag: &str, user_tag: &str, ip: IpAddr) -> Admission {
        let Some(table) = self.table(tag) else {
            debug!(tag, policy = ?self.missing_table_policy, "no limiter table for inbound");
            return match self.missing_table_policy {
                MissingTablePolicy::Allow => Admission::unrestricted(),
                MissingTablePolicy::Reject => Admission::rejected(),
            };
        };

        // Unknown users carry no limits of their own.
        let limit = table.user(user_tag).unwrap_or_else(|| UserLimit {
            uid: parse_user_tag_uid(user_tag).unwrap_or(0),
            ..UserLimit::default()
        });

        match table.check_device(user_tag, limit, ip) {
            DeviceCheck::Rejected => return Admission::rejected(),
            DeviceCheck::Added => {
                if let Some(global) = table.global() {
                    global.observe(Arc::clone(&table), user_tag, limit, ip);
                }
            }
            DeviceCheck::Known => {}
        }

        let rate = determine_rate(table.node_speed_limit(), limit.speed_limit);
        match table.bucket(user_tag, rate) {
            Some(bucket) => Admission {
                bucket: Some(bucket),
                throttle: true,
                reject: false,
            },
            None => Admission::unrestricted(),
        }
    }

    /// Take and clear every online set under `tag`.
    pub fn drain_online_devices(&self, tag: &str) -> Result<Vec<OnlineUser>, LimiterError> {
        Ok(self.require(tag)?.drain_online())
    }

    /// Device rejections under `tag` since the previous call.
    pub fn take_rejections(&self, tag: &str) -> u64 {
        self.table(tag).map_or(0, |t| t.take_rejections())
    }

    /// Merge cluster-wide device sets into the local table for `tag`.
    ///
    /// A no-op returning 0 when the table has no shared store attached.
    pub async fn sync_global_devices(&self, tag: &str) -> Result<usize, LimiterError> {
        let table = self.require(tag)?;
        match table.global() {
            Some(global) => global.sync(&table).await,
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_takes_smaller_nonzero_limit() {
        assert_eq!(determine_rate(0, 0), 0);
        assert_eq!(determine_rate(0, 5), 5);
        assert_eq!(determine_rate(5, 0), 5);
        assert_eq!(determine_rate(3, 7), 3);
        assert_eq!(determine_rate(7, 3), 3);
        assert_eq!(determine_rate(4, 4), 4);
    }

    #[test]
    fn missing_table_follows_policy() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let open = Limiter::new();
        let admission = open.admit("nope", "nope|a|1", ip);
        assert!(!admission.reject);
        assert!(!admission.throttle);

        let closed = Limiter::new().with_missing_table_policy(MissingTablePolicy::Reject);
        assert!(closed.admit("nope", "nope|a|1", ip).reject);
    }

    #[test]
    fn update_on_unknown_tag_errors() {
        let limiter = Limiter::new();
        assert!(matches!(
            limiter.update_inbound("gone", &[]),
            Err(LimiterError::NoSuchInbound(_))
        ));
        assert!(limiter.drain_online_devices("gone").is_err());
    }
}
