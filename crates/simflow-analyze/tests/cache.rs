use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use serde_json::json;
use simflow_analyze::{ShardedCache, EXCEPTION_KEY};
use simflow_core::errors::{ErrorInfo, FlowError, Phase};

#[test]
fn shards_scale_with_workers() {
    assert_eq!(ShardedCache::for_workers(4).shard_count(), 8);
    assert_eq!(ShardedCache::for_workers(0).shard_count(), 2);
    assert_eq!(ShardedCache::new(0).shard_count(), 1);
}

#[test]
fn set_get_and_set_if_absent() {
    let cache = ShardedCache::new(3);
    assert_eq!(cache.get("missing").expect("get"), None);
    assert_eq!(cache.get_or("missing", json!(7)).expect("get_or"), json!(7));

    cache.set("a", json!(1)).expect("set");
    cache.set("a", json!(2)).expect("set");
    assert_eq!(cache.get("a").expect("get"), Some(json!(2)));

    assert!(!cache.set_if_absent("a", json!(3)).expect("set_if_absent"));
    assert!(cache.set_if_absent("b", json!(4)).expect("set_if_absent"));
    assert_eq!(cache.get("a").expect("get"), Some(json!(2)));
    assert!(cache.contains("b").expect("contains"));
}

#[test]
fn transactions_see_every_shard() {
    let cache = ShardedCache::new(4);
    for key in ["delta", "alpha", "charlie", "bravo"] {
        cache.set(key, json!(key.len())).expect("set");
    }
    let (keys, total) = cache
        .transact(|view| {
            let keys = view.keys();
            let total: u64 = keys
                .iter()
                .filter_map(|key| view.get(key).and_then(|value| value.as_u64()))
                .sum();
            (keys, total)
        })
        .expect("transact");
    assert_eq!(keys, vec!["alpha", "bravo", "charlie", "delta"]);
    assert_eq!(total, 22);
    assert_eq!(cache.len().expect("len"), 4);

    cache.clear().expect("clear");
    assert!(cache.is_empty().expect("is_empty"));
}

#[test]
fn first_exception_wins() {
    let cache = ShardedCache::new(2);
    assert!(!cache.has_exception());
    assert_eq!(cache.exception().expect("read"), None);

    let first = FlowError::Analyzer(ErrorInfo::new("boom", "first"))
        .with_phase(Phase::Map)
        .with_analyzer("A")
        .with_entity("sim-3");
    let second = FlowError::Analyzer(ErrorInfo::new("boom", "second")).with_analyzer("B");
    assert!(cache.post_exception(&first).expect("post"));
    assert!(!cache.post_exception(&second).expect("post"));

    assert!(cache.has_exception());
    assert!(cache.contains(EXCEPTION_KEY).expect("contains"));
    let stored = cache.exception().expect("read").expect("posted");
    assert_eq!(stored, first);
    assert_eq!(stored.analyzer(), Some("A"));
    assert_eq!(stored.entity(), Some("sim-3"));
}

#[test]
fn concurrent_writers_do_not_lose_entries() {
    let cache = Arc::new(ShardedCache::for_workers(4));
    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let cache = cache.clone();
            thread::spawn(move || {
                for index in 0..250 {
                    cache
                        .set(format!("{worker}-{index}"), json!(index))
                        .expect("set");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer");
    }
    assert_eq!(cache.len().expect("len"), 2000);
    assert_eq!(cache.get("7-249").expect("get"), Some(json!(249)));
}

proptest! {
    #[test]
    fn shard_choice_is_stable(keys in proptest::collection::btree_set("[a-z0-9]{1,12}", 1..40), shards in 1usize..16) {
        let cache = ShardedCache::new(shards);
        for key in &keys {
            cache.set(key.clone(), json!(key)).expect("set");
        }
        for key in &keys {
            prop_assert_eq!(cache.get(key).expect("get"), Some(json!(key)));
        }
        prop_assert_eq!(cache.keys().expect("keys"), keys.into_iter().collect::<Vec<_>>());
    }
}
