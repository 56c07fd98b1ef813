//! End-to-end expiry behaviour through the engine facade.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use driftkv_kv::{Bucket, ExpiryPager, GetOptions, IoNotifier, KvStore, MemoryKvStore, NullNotifier};
use driftkv_test_utils::{make_item_with_expiry, TimeTraveller};
use driftkv_types::clock::WallClock;
use driftkv_types::config::{KvConfig, KvStoreConfig};
use driftkv_types::key::DocKey;
use driftkv_types::{CookieId, EvictionPolicy, Status, StoreOperation, VbState, Vbid};

fn build_bucket() -> (Arc<Bucket>, TimeTraveller) {
    let config = KvConfig::builder()
        .max_vbuckets(1)
        .ht_size(47)
        .exp_pager_interval(Duration::from_secs(1))
        .build()
        .expect("valid config");
    let clock = Arc::new(WallClock::new());
    let store = Arc::new(MemoryKvStore::new(KvStoreConfig::from_config(&config, 0)));
    let bucket = Arc::new(
        Bucket::new(
            config,
            EvictionPolicy::ValueOnly,
            Arc::clone(&clock),
            Arc::new(NullNotifier) as Arc<dyn IoNotifier>,
            store as Arc<dyn KvStore>,
        )
        .expect("valid bucket"),
    );
    bucket.set_vbucket_state(Vbid::new(0), VbState::Active);
    (bucket, TimeTraveller::new(clock))
}

fn get_status(bucket: &Bucket, key: &str) -> Status {
    bucket
        .get(
            &DocKey::default_collection(key.as_bytes().to_vec()),
            Vbid::new(0),
            CookieId::new(1),
            GetOptions::default(),
        )
        .status
}

// Store keys with no TTL, +10s and +20s. After +11s the first TTL key is
// gone; after a further +10s the second follows; the TTL-less key
// survives both sweeps. Each sweep produces exactly one deletion for the
// flusher.
#[test]
fn expiry_pager_scenario() {
    let (bucket, time) = build_bucket();
    let vbid = Vbid::new(0);
    let now = time.clock().now_secs();

    for (key, ttl) in [("key_0", 0), ("key_1", 10), ("key_2", 20)] {
        let exptime = if ttl == 0 { 0 } else { (now + ttl) as u32 };
        let item = make_item_with_expiry(0, key.as_bytes(), &[b'x'; 512], exptime);
        assert_eq!(bucket.store(&item, StoreOperation::Set, CookieId::new(1)).status, Status::Success);
    }
    assert_eq!(bucket.flush_vbucket(vbid), 3);

    let vb = bucket.vbucket(vbid).unwrap();
    assert_eq!(vb.num_items(EvictionPolicy::ValueOnly), 3);

    let pager = ExpiryPager::new(Arc::clone(&bucket));

    time.travel(Duration::from_secs(11));
    assert_eq!(pager.run_cycle(), 1);
    assert_eq!(bucket.flush_vbucket(vbid), 1);

    assert_eq!(vb.num_items(EvictionPolicy::ValueOnly), 2);
    assert_eq!(get_status(&bucket, "key_0"), Status::Success, "key without TTL should survive");
    assert_eq!(get_status(&bucket, "key_1"), Status::KeyNoent, "key with TTL:10 should be removed");
    assert_eq!(get_status(&bucket, "key_2"), Status::Success, "key with TTL:20 should survive");

    time.travel(Duration::from_secs(10));
    assert_eq!(vb.num_items(EvictionPolicy::ValueOnly), 2);
    assert_eq!(pager.run_cycle(), 1);
    assert_eq!(bucket.flush_vbucket(vbid), 1);

    assert_eq!(vb.num_items(EvictionPolicy::ValueOnly), 1);
    assert_eq!(get_status(&bucket, "key_0"), Status::Success);
    assert_eq!(get_status(&bucket, "key_2"), Status::KeyNoent, "key with TTL:20 should be removed");
}

// Expiry found by a plain read is charged to access, not the pager.
#[test]
fn expiry_on_access_counts_separately() {
    let (bucket, time) = build_bucket();
    let now = time.clock().now_secs();
    let item = make_item_with_expiry(0, b"ttl", b"v", (now + 5) as u32);
    bucket.store(&item, StoreOperation::Set, CookieId::new(1));

    time.travel(Duration::from_secs(6));
    assert_eq!(get_status(&bucket, "ttl"), Status::KeyNoent);

    use std::sync::atomic::Ordering;
    assert_eq!(bucket.stats().expired_access.load(Ordering::Relaxed), 1);
    assert_eq!(bucket.stats().expired_pager.load(Ordering::Relaxed), 0);
}
