//! Per-inbound limit state.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{DashMap, DashSet};
use nodeward_core::{OnlineUser, UserInfo, build_user_tag};

use crate::bucket::RateBucket;
use crate::global::GlobalDeviceLimit;
use crate::limiter::determine_rate;
use crate::online::OnlineIpSet;

/// Limits configured for one user on one inbound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserLimit {
    pub uid: u32,
    /// Bytes/second (0 = unlimited).
    pub speed_limit: u64,
    /// Distinct source IPs (0 = unlimited).
    pub device_limit: u32,
}

impl From<&UserInfo> for UserLimit {
    fn from(user: &UserInfo) -> Self {
        Self {
            uid: user.uid,
            speed_limit: user.speed_limit,
            device_limit: user.device_limit,
        }
    }
}

/// Outcome of the device check for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeviceCheck {
    /// Address already counted for this interval.
    Known,
    /// Address newly counted.
    Added,
    Rejected,
}

/// Limit state for one inbound tag.
///
/// All maps are keyed by user tag (`{tag}|{email}|{uid}`). Each map is
/// sharded, so work for distinct users proceeds in parallel while the
/// device check for one user is serialized by its entry lock.
#[derive(Debug)]
pub struct InboundLimitTable {
    tag: String,
    node_speed_limit: u64,
    users: DashMap<String, UserLimit>,
    buckets: DashMap<String, Arc<RateBucket>>,
    online: DashMap<String, OnlineIpSet>,
    over_global: DashSet<String>,
    global: Option<GlobalDeviceLimit>,
    rejected: AtomicU64,
}

impl InboundLimitTable {
    pub fn new(tag: impl Into<String>, node_speed_limit: u64, users: &[UserInfo]) -> Self {
        let tag = tag.into();
        let map = DashMap::with_capacity(users.len());
        for user in users {
            map.insert(build_user_tag(&tag, user), UserLimit::from(user));
        }
        Self {
            tag,
            node_speed_limit,
            users: map,
            buckets: DashMap::new(),
            online: DashMap::new(),
            over_global: DashSet::new(),
            global: None,
            rejected: AtomicU64::new(0),
        }
    }

    /// Mirror device observations for this inbound to a shared store.
    pub fn with_global(mut self, global: GlobalDeviceLimit) -> Self {
        self.global = Some(global);
        self
    }

    pub fn global(&self) -> Option<&GlobalDeviceLimit> {
        self.global.as_ref()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn node_speed_limit(&self) -> u64 {
        self.node_speed_limit
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn user(&self, user_tag: &str) -> Option<UserLimit> {
        self.users.get(user_tag).map(|u| *u)
    }

    /// Every registered user tag with its limits.
    pub fn users(&self) -> Vec<(String, UserLimit)> {
        self.users
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Insert or replace users. A bucket whose rate no longer matches the
    /// user's effective rate is dropped so the next admission rebuilds it.
    pub fn upsert_users(&self, users: &[UserInfo]) {
        for user in users {
            let user_tag = build_user_tag(&self.tag, user);
            let limit = UserLimit::from(user);
            self.users.insert(user_tag.clone(), limit);

            let effective = determine_rate(self.node_speed_limit, limit.speed_limit);
            self.buckets
                .remove_if(&user_tag, |_, bucket| effective == 0 || bucket.limit() != effective);
        }
    }

    /// Forget users. Their online sets stay until the next drain so the
    /// interval's device report stays complete.
    pub fn remove_users(&self, user_tags: &[String]) {
        for user_tag in user_tags {
            self.users.remove(user_tag);
            self.buckets.remove(user_tag);
            self.over_global.remove(user_tag);
        }
    }

    /// Insert-if-room for one (user, address) pair. The entry lock is held
    /// across insert, count and revert.
    pub(crate) fn check_device(&self, user_tag: &str, limit: UserLimit, ip: IpAddr) -> DeviceCheck {
        let mut set = self
            .online
            .entry(user_tag.to_string())
            .or_insert_with(|| OnlineIpSet::new(limit.uid));
        if set.contains(&ip) {
            return DeviceCheck::Known;
        }
        if limit.device_limit > 0 && self.over_global.contains(user_tag) {
            drop(set);
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return DeviceCheck::Rejected;
        }
        if set.try_insert(ip, limit.device_limit) {
            DeviceCheck::Added
        } else {
            drop(set);
            self.rejected.fetch_add(1, Ordering::Relaxed);
            DeviceCheck::Rejected
        }
    }

    /// Bucket sized for `rate`, reusing the cached one when it still matches.
    pub(crate) fn bucket(&self, user_tag: &str, rate: u64) -> Option<Arc<RateBucket>> {
        if let Some(bucket) = self.buckets.get(user_tag) {
            if bucket.limit() == rate {
                return Some(Arc::clone(&bucket));
            }
        }
        let fresh = Arc::new(RateBucket::new(rate)?);
        let mut entry = self
            .buckets
            .entry(user_tag.to_string())
            .or_insert_with(|| Arc::clone(&fresh));
        if entry.limit() != rate {
            *entry = Arc::clone(&fresh);
        }
        Some(Arc::clone(&entry))
    }

    pub(crate) fn set_over_global(&self, user_tag: &str, over: bool) {
        if over {
            self.over_global.insert(user_tag.to_string());
        } else {
            self.over_global.remove(user_tag);
        }
    }

    pub fn is_over_global(&self, user_tag: &str) -> bool {
        self.over_global.contains(user_tag)
    }

    /// Merge addresses seen elsewhere in the cluster into a user's online set.
    pub(crate) fn merge_online(&self, user_tag: &str, uid: u32, ips: impl IntoIterator<Item = IpAddr>) -> usize {
        let mut set = self
            .online
            .entry(user_tag.to_string())
            .or_insert_with(|| OnlineIpSet::new(uid));
        ips.into_iter().filter(|ip| set.insert(*ip)).count()
    }

    pub fn online_count(&self, user_tag: &str) -> usize {
        self.online.get(user_tag).map_or(0, |s| s.len())
    }

    /// Take every online set, leaving the table empty for the next interval.
    ///
    /// Buckets of users not seen during the interval are dropped too.
    pub fn drain_online(&self) -> Vec<OnlineUser> {
        self.buckets.retain(|user_tag, _| self.online.contains_key(user_tag));

        let keys: Vec<String> = self.online.iter().map(|e| e.key().clone()).collect();
        let mut out = Vec::new();
        for key in keys {
            if let Some((_, set)) = self.online.remove(&key) {
                out.extend(set.into_online_users());
            }
        }
        self.over_global.clear();
        out
    }

    /// Device rejections since the previous call.
    pub fn take_rejections(&self) -> u64 {
        self.rejected.swap(0, Ordering::Relaxed)
    }
}
