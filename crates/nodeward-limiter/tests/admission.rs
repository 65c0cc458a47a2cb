//! Admission behaviour across the public limiter surface.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use nodeward_core::{UserInfo, build_user_tag};
use nodeward_limiter::{GlobalDeviceLimit, Limiter, MemoryStore, SharedStore};

const TAG: &str = "Trojan_0.0.0.0_443";

fn user(uid: u32, speed: u64, devices: u32) -> UserInfo {
    UserInfo {
        uid,
        email: format!("{uid}@v2board.user"),
        uuid: format!("uuid-{uid}"),
        speed_limit: speed,
        device_limit: devices,
        ..Default::default()
    }
}

fn ip(last: u8) -> IpAddr {
    IpAddr::from([10, 1, 0, last])
}

#[test]
fn concurrent_new_devices_respect_cap() {
    for _ in 0..20 {
        let limiter = Limiter::new();
        let u = user(1, 0, 3);
        limiter.add_inbound(TAG, 0, std::slice::from_ref(&u));
        let user_tag = build_user_tag(TAG, &u);

        let admitted = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for i in 0..4u8 {
                let limiter = &limiter;
                let user_tag = &user_tag;
                let admitted = &admitted;
                s.spawn(move || {
                    if !limiter.admit(TAG, user_tag, ip(i)).reject {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 3);
        assert_eq!(limiter.take_rejections(TAG), 1);
    }
}

#[test]
fn reconnects_from_known_address_are_admitted() {
    let limiter = Limiter::new();
    let u = user(1, 0, 1);
    limiter.add_inbound(TAG, 0, std::slice::from_ref(&u));
    let user_tag = build_user_tag(TAG, &u);

    assert!(!limiter.admit(TAG, &user_tag, ip(1)).reject);
    assert!(!limiter.admit(TAG, &user_tag, ip(1)).reject);
    assert!(limiter.admit(TAG, &user_tag, ip(2)).reject);
}

#[test]
fn bucket_uses_effective_rate() {
    let limiter = Limiter::new();
    let fast = user(1, 0, 0);
    let slow = user(2, 500, 0);
    limiter.add_inbound(TAG, 1000, &[fast.clone(), slow.clone()]);

    let a = limiter.admit(TAG, &build_user_tag(TAG, &fast), ip(1));
    assert!(a.throttle);
    assert_eq!(a.bucket.unwrap().limit(), 1000);

    let b = limiter.admit(TAG, &build_user_tag(TAG, &slow), ip(2));
    assert_eq!(b.bucket.unwrap().limit(), 500);
}

#[test]
fn unlimited_user_gets_no_bucket() {
    let limiter = Limiter::new();
    let u = user(1, 0, 0);
    limiter.add_inbound(TAG, 0, std::slice::from_ref(&u));
    let admission = limiter.admit(TAG, &build_user_tag(TAG, &u), ip(1));
    assert!(!admission.throttle);
    assert!(!admission.reject);
    assert!(admission.bucket.is_none());
}

#[test]
fn update_replaces_bucket_with_new_limit() {
    let limiter = Limiter::new();
    let u = user(1, 1000, 0);
    limiter.add_inbound(TAG, 0, std::slice::from_ref(&u));
    let user_tag = build_user_tag(TAG, &u);

    let before = limiter.admit(TAG, &user_tag, ip(1)).bucket.unwrap();
    limiter.update_inbound(TAG, &[user(1, 250, 0)]).unwrap();
    let after = limiter.admit(TAG, &user_tag, ip(1)).bucket.unwrap();

    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(before.limit(), 1000);
    assert_eq!(after.limit(), 250);

    limiter.update_inbound(TAG, &[user(1, 0, 0)]).unwrap();
    assert!(limiter.admit(TAG, &user_tag, ip(1)).bucket.is_none());
}

#[test]
fn drain_is_destructive() {
    let limiter = Limiter::new();
    let a = user(1, 0, 0);
    let b = user(2, 0, 0);
    limiter.add_inbound(TAG, 0, &[a.clone(), b.clone()]);
    limiter.admit(TAG, &build_user_tag(TAG, &a), ip(1));
    limiter.admit(TAG, &build_user_tag(TAG, &a), ip(2));
    limiter.admit(TAG, &build_user_tag(TAG, &b), ip(3));

    let mut first = limiter.drain_online_devices(TAG).unwrap();
    first.sort_by_key(|o| (o.uid, o.ip));
    assert_eq!(first.len(), 3);
    assert_eq!(first[0].uid, 1);
    assert_eq!(first[2].uid, 2);

    assert!(limiter.drain_online_devices(TAG).unwrap().is_empty());
}

#[test]
fn device_cap_resets_after_drain() {
    let limiter = Limiter::new();
    let u = user(1, 0, 1);
    limiter.add_inbound(TAG, 0, std::slice::from_ref(&u));
    let user_tag = build_user_tag(TAG, &u);

    assert!(!limiter.admit(TAG, &user_tag, ip(1)).reject);
    assert!(limiter.admit(TAG, &user_tag, ip(2)).reject);
    limiter.drain_online_devices(TAG).unwrap();
    assert!(!limiter.admit(TAG, &user_tag, ip(2)).reject);
}

#[test]
fn removed_users_keep_interval_devices_until_drain() {
    let limiter = Limiter::new();
    let u = user(1, 100, 0);
    limiter.add_inbound(TAG, 0, std::slice::from_ref(&u));
    let user_tag = build_user_tag(TAG, &u);
    limiter.admit(TAG, &user_tag, ip(1));

    limiter.remove_users(TAG, &[user_tag.clone()]).unwrap();
    assert!(limiter.table(TAG).unwrap().user(&user_tag).is_none());
    assert_eq!(limiter.drain_online_devices(TAG).unwrap().len(), 1);
}

#[test]
fn unknown_user_is_reported_under_tag_uid() {
    let limiter = Limiter::new();
    limiter.add_inbound(TAG, 0, &[]);
    let user_tag = format!("{TAG}|42@v2board.user|42");

    let admission = limiter.admit(TAG, &user_tag, ip(7));
    assert!(!admission.reject);
    assert!(admission.bucket.is_none());

    let online = limiter.drain_online_devices(TAG).unwrap();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0].uid, 42);
    assert_eq!(online[0].ip, ip(7));
}

#[test]
fn remove_inbound_drops_table() {
    let limiter = Limiter::new();
    limiter.add_inbound(TAG, 0, &[]);
    assert!(limiter.contains(TAG));
    assert!(limiter.remove_inbound(TAG));
    assert!(!limiter.remove_inbound(TAG));
    assert!(!limiter.contains(TAG));
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn global_limit_rejects_new_devices_after_observation() {
    let store = Arc::new(MemoryStore::new());
    let global = GlobalDeviceLimit::new(store.clone(), "dev:", Duration::from_secs(60));
    let limiter = Limiter::new();
    let u = user(1, 0, 2);
    limiter.add_inbound_with_global(TAG, 0, std::slice::from_ref(&u), Some(global.clone()));
    let user_tag = build_user_tag(TAG, &u);

    // Another node already holds two addresses for this user.
    store.seed(&global.store_key(&user_tag), [ip(100), ip(101)], Duration::from_secs(60));

    // Local check passes; the background observation pushes the count to 3.
    assert!(!limiter.admit(TAG, &user_tag, ip(1)).reject);
    settle().await;

    assert!(limiter.table(TAG).unwrap().is_over_global(&user_tag));
    assert!(limiter.admit(TAG, &user_tag, ip(2)).reject);
    // The address that was already admitted keeps working.
    assert!(!limiter.admit(TAG, &user_tag, ip(1)).reject);
}

#[tokio::test]
async fn global_key_is_shared_across_tags() {
    let store = Arc::new(MemoryStore::new());
    let global = GlobalDeviceLimit::new(store.clone(), "dev:", Duration::from_secs(60));
    let u = user(7, 0, 0);
    let a = global.store_key(&build_user_tag("V2ray_0.0.0.0_80", &u));
    let b = global.store_key(&build_user_tag("Trojan_0.0.0.0_443", &u));
    assert_eq!(a, b);
    assert_eq!(a, "dev:7@v2board.user|7");
}

#[tokio::test]
async fn sync_merges_cluster_devices() {
    let store = Arc::new(MemoryStore::new());
    let global = GlobalDeviceLimit::new(store.clone(), "dev:", Duration::from_secs(60));
    let limiter = Limiter::new();
    let u = user(1, 0, 0);
    limiter.add_inbound_with_global(TAG, 0, std::slice::from_ref(&u), Some(global.clone()));
    let user_tag = build_user_tag(TAG, &u);

    store.seed(&global.store_key(&user_tag), [ip(50), ip(51)], Duration::from_secs(60));
    assert_eq!(limiter.sync_global_devices(TAG).await.unwrap(), 2);
    assert_eq!(limiter.sync_global_devices(TAG).await.unwrap(), 0);
    assert_eq!(limiter.drain_online_devices(TAG).unwrap().len(), 2);
}

#[tokio::test]
async fn sync_without_store_is_noop() {
    let limiter = Limiter::new();
    limiter.add_inbound(TAG, 0, &[user(1, 0, 0)]);
    assert_eq!(limiter.sync_global_devices(TAG).await.unwrap(), 0);
}

#[tokio::test]
async fn failing_store_never_rejects() {
    struct Broken;

    #[async_trait::async_trait]
    impl SharedStore for Broken {
        async fn observe(
            &self,
            _key: &str,
            _ip: IpAddr,
            _ttl: Duration,
        ) -> Result<usize, nodeward_limiter::LimiterError> {
            Err(nodeward_limiter::LimiterError::Timeout)
        }

        async fn members(
            &self,
            _keys: &[String],
        ) -> Result<Vec<std::collections::HashSet<IpAddr>>, nodeward_limiter::LimiterError> {
            Err(nodeward_limiter::LimiterError::Timeout)
        }
    }

    let global = GlobalDeviceLimit::new(Arc::new(Broken), "dev:", Duration::from_secs(60));
    let limiter = Limiter::new();
    let u = user(1, 0, 1);
    limiter.add_inbound_with_global(TAG, 0, std::slice::from_ref(&u), Some(global));
    let user_tag = build_user_tag(TAG, &u);

    assert!(!limiter.admit(TAG, &user_tag, ip(1)).reject);
    settle().await;
    assert!(!limiter.admit(TAG, &user_tag, ip(1)).reject);
    assert!(limiter.sync_global_devices(TAG).await.is_err());
}
