//! Usage-triggered speed throttling.
//!
//! A user whose upload or download in one interval exceeds the configured
//! sustained rate collects a warning. Once warnings exceed `warn_times`
//! (immediately when it is 0) the user is suspended: their speed limit is
//! lowered for a fixed duration and restored when it expires. A quiet or
//! compliant interval clears the warnings.

use std::collections::HashMap;
use std::time::Duration;

use nodeward_core::UserInfo;
use tokio::time::Instant;

use crate::config::AutoSpeedLimitConfig;

/// A temporary reduced speed limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitSuspension {
    pub expiry: Instant,
    pub restore_speed_limit: u64,
}

/// Per-controller throttling state. Time is passed in by the caller.
#[derive(Debug)]
pub struct AutoThrottle {
    /// Bytes allowed in either direction per interval.
    threshold_bytes: u64,
    warn_times: u32,
    limited_speed: u64,
    duration: Duration,
    warned: HashMap<u32, u32>,
    suspended: HashMap<u32, LimitSuspension>,
}

impl AutoThrottle {
    /// Build from config for a given report interval. `None` when disabled.
    pub fn from_config(config: &AutoSpeedLimitConfig, interval: Duration) -> Option<Self> {
        if !config.enabled() {
            return None;
        }
        Some(Self {
            threshold_bytes: config
                .threshold_bytes_per_sec()
                .saturating_mul(interval.as_secs()),
            warn_times: config.warn_times,
            limited_speed: config.limited_bytes_per_sec(),
            duration: config.duration(),
            warned: HashMap::new(),
            suspended: HashMap::new(),
        })
    }

    pub fn threshold_bytes(&self) -> u64 {
        self.threshold_bytes
    }

    /// Account one interval of traffic for `user`.
    ///
    /// Returns the throttled version of the user when this observation
    /// starts a suspension.
    pub fn observe(&mut self, user: &UserInfo, upload: u64, download: u64, now: Instant) -> Option<UserInfo> {
        if upload <= self.threshold_bytes && download <= self.threshold_bytes {
            self.warned.remove(&user.uid);
            return None;
        }
        if self.suspended.contains_key(&user.uid) {
            return None;
        }

        if self.warn_times > 0 {
            let count = self.warned.entry(user.uid).or_insert(0);
            *count += 1;
            if *count <= self.warn_times {
                return None;
            }
        }
        self.warned.remove(&user.uid);

        self.suspended.insert(
            user.uid,
            LimitSuspension {
                expiry: now + self.duration,
                restore_speed_limit: user.speed_limit,
            },
        );
        let mut limited = user.clone();
        limited.speed_limit = self.limited_speed;
        Some(limited)
    }

    /// Forget warnings for a user that moved no traffic.
    pub fn clear_warning(&mut self, uid: u32) {
        self.warned.remove(&uid);
    }

    /// Remove suspensions whose expiry is at or before `now`.
    pub fn release_expired(&mut self, now: Instant) -> Vec<(u32, LimitSuspension)> {
        let expired: Vec<u32> = self
            .suspended
            .iter()
            .filter(|(_, s)| s.expiry <= now)
            .map(|(uid, _)| *uid)
            .collect();
        expired
            .into_iter()
            .filter_map(|uid| self.suspended.remove(&uid).map(|s| (uid, s)))
            .collect()
    }

    /// Lower `user`'s limit if a suspension is active. Returns whether it was.
    pub fn apply(&self, user: &mut UserInfo) -> bool {
        if self.suspended.contains_key(&user.uid) {
            user.speed_limit = self.limited_speed;
            true
        } else {
            false
        }
    }

    pub fn suspension(&self, uid: u32) -> Option<LimitSuspension> {
        self.suspended.get(&uid).copied()
    }

    pub fn suspended_count(&self) -> usize {
        self.suspended.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(60);

    fn config(warn_times: u32) -> AutoSpeedLimitConfig {
        AutoSpeedLimitConfig {
            limit_mbps: 8,
            warn_times,
            limit_speed_mbps: 1,
            limit_duration_mins: 10,
        }
    }

    fn user(uid: u32) -> UserInfo {
        UserInfo {
            uid,
            speed_limit: 5_000_000,
            ..Default::default()
        }
    }

    // 8 Mbps for 60 s
    const THRESHOLD: u64 = 60_000_000;

    #[test]
    fn disabled_without_limit() {
        assert!(AutoThrottle::from_config(&AutoSpeedLimitConfig::default(), INTERVAL).is_none());
        let t = AutoThrottle::from_config(&config(0), INTERVAL).unwrap();
        assert_eq!(t.threshold_bytes(), THRESHOLD);
    }

    #[test]
    fn zero_warn_times_throttles_immediately() {
        let mut t = AutoThrottle::from_config(&config(0), INTERVAL).unwrap();
        let now = Instant::now();
        let limited = t.observe(&user(1), 0, THRESHOLD + 1, now).unwrap();
        assert_eq!(limited.speed_limit, 125_000);
        assert_eq!(t.suspension(1).unwrap().restore_speed_limit, 5_000_000);
    }

    #[test]
    fn throttles_after_warn_times_plus_one_breaches() {
        let mut t = AutoThrottle::from_config(&config(2), INTERVAL).unwrap();
        let now = Instant::now();
        assert!(t.observe(&user(1), THRESHOLD + 1, 0, now).is_none());
        assert!(t.observe(&user(1), THRESHOLD + 1, 0, now).is_none());
        assert!(t.observe(&user(1), THRESHOLD + 1, 0, now).is_some());
        // still breaching while suspended: no second suspension
        assert!(t.observe(&user(1), THRESHOLD + 1, 0, now).is_none());
        assert_eq!(t.suspended_count(), 1);
    }

    #[test]
    fn compliant_interval_resets_warnings() {
        let mut t = AutoThrottle::from_config(&config(1), INTERVAL).unwrap();
        let now = Instant::now();
        assert!(t.observe(&user(1), THRESHOLD + 1, 0, now).is_none());
        assert!(t.observe(&user(1), THRESHOLD, 0, now).is_none());
        assert!(t.observe(&user(1), THRESHOLD + 1, 0, now).is_none());
        t.clear_warning(1);
        assert!(t.observe(&user(1), THRESHOLD + 1, 0, now).is_none());
        assert!(t.observe(&user(1), THRESHOLD + 1, 0, now).is_some());
    }

    #[test]
    fn release_happens_at_expiry_not_before() {
        let mut t = AutoThrottle::from_config(&config(0), INTERVAL).unwrap();
        let start = Instant::now();
        t.observe(&user(1), THRESHOLD + 1, 0, start);

        let almost = start + Duration::from_secs(599);
        assert!(t.release_expired(almost).is_empty());

        let released = t.release_expired(start + Duration::from_secs(600));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].0, 1);
        assert_eq!(released[0].1.restore_speed_limit, 5_000_000);
        assert_eq!(t.suspended_count(), 0);
    }

    #[test]
    fn apply_lowers_only_suspended_users() {
        let mut t = AutoThrottle::from_config(&config(0), INTERVAL).unwrap();
        t.observe(&user(1), THRESHOLD + 1, 0, Instant::now());
        let mut a = user(1);
        let mut b = user(2);
        assert!(t.apply(&mut a));
        assert!(!t.apply(&mut b));
        assert_eq!(a.speed_limit, 125_000);
        assert_eq!(b.speed_limit, 5_000_000);
    }
}
