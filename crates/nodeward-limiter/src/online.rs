//! Per-user set of source addresses seen since the last drain.

use std::collections::HashSet;
use std::net::IpAddr;

use nodeward_core::OnlineUser;

/// Distinct source IPs observed for one user during the current interval.
///
/// "Online" means seen since the last drain, not currently connected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnlineIpSet {
    uid: u32,
    ips: HashSet<IpAddr>,
}

impl OnlineIpSet {
    /// Empty set for `uid`.
    pub fn new(uid: u32) -> Self {
        Self {
            uid,
            ips: HashSet::new(),
        }
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn len(&self) -> usize {
        self.ips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.ips.contains(ip)
    }

    /// Insert `ip` unless doing so would exceed `limit` distinct addresses.
    ///
    /// A known address is always accepted. A limit of 0 means unlimited.
    /// The caller must hold exclusive access to the set for the whole call.
    pub fn try_insert(&mut self, ip: IpAddr, limit: u32) -> bool {
        if !self.ips.insert(ip) {
            return true;
        }
        if limit > 0 && self.ips.len() > limit as usize {
            self.ips.remove(&ip);
            return false;
        }
        true
    }

    /// Insert without a cap. Used when merging cluster-wide observations.
    pub fn insert(&mut self, ip: IpAddr) -> bool {
        self.ips.insert(ip)
    }

    /// Consume the set into report records.
    pub fn into_online_users(self) -> impl Iterator<Item = OnlineUser> {
        let uid = self.uid;
        self.ips.into_iter().map(move |ip| OnlineUser { uid, ip })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn cap_rejects_and_reverts() {
        let mut set = OnlineIpSet::new(7);
        assert!(set.try_insert(ip("10.0.0.1"), 2));
        assert!(set.try_insert(ip("10.0.0.2"), 2));
        assert!(!set.try_insert(ip("10.0.0.3"), 2));
        assert_eq!(set.len(), 2);
        assert!(!set.contains(&ip("10.0.0.3")));
    }

    #[test]
    fn known_address_is_always_accepted() {
        let mut set = OnlineIpSet::new(1);
        assert!(set.try_insert(ip("10.0.0.1"), 1));
        assert!(set.try_insert(ip("10.0.0.1"), 1));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn zero_limit_is_unbounded() {
        let mut set = OnlineIpSet::new(1);
        for i in 0..50u8 {
            assert!(set.try_insert(IpAddr::from([10, 0, 0, i]), 0));
        }
        assert_eq!(set.len(), 50);
    }

    #[test]
    fn drain_to_records() {
        let mut set = OnlineIpSet::new(9);
        set.insert(ip("::1"));
        let users: Vec<_> = set.into_online_users().collect();
        assert_eq!(users, vec![OnlineUser { uid: 9, ip: ip("::1") }]);
    }
}
