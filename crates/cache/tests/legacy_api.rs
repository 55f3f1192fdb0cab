//! Handles, existence checks and shutdown of the legacy API

mod common;

use common::{CountingDeriver, TestCacheBuilder};
use ddc_cache::legacy::FIRST_HANDLE;
use ddc_cache::CacheStore;
use ddc_core::{Error, Status};
use std::collections::HashSet;
use std::sync::Arc;

#[test]
fn test_concurrent_handles_are_unique_and_nonzero() {
    let test = TestCacheBuilder::new().build();
    let cache = Arc::new(test.cache);

    let threads: Vec<_> = (0..8)
        .map(|thread| {
            let cache = cache.clone();
            std::thread::spawn(move || {
                (0..16)
                    .map(|i| {
                        cache
                            .get_asynchronous_by_key(&format!("TEST_1_{thread}_{i}"), "unique")
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut handles = HashSet::new();
    for thread in threads {
        for handle in thread.join().unwrap() {
            assert_ne!(handle, 0);
            assert!(handle >= FIRST_HANDLE);
            assert!(handles.insert(handle), "duplicate handle {handle}");
        }
    }
    assert_eq!(handles.len(), 128);

    for handle in handles {
        let result = cache.get_asynchronous_results(handle).unwrap();
        assert_eq!(result.status, Status::Error);
    }
}

#[test]
fn test_results_can_be_retrieved_once() {
    let test = TestCacheBuilder::new().build();
    let deriver = CountingDeriver::new("once", b"data");
    let handle = test.cache.get_asynchronous(deriver.boxed()).unwrap();

    let first = test.cache.get_asynchronous_results(handle).unwrap();
    assert_eq!(first.status, Status::Ok);
    assert_eq!(first.data, b"data");

    let second = test.cache.get_asynchronous_results(handle);
    assert!(matches!(second, Err(Error::UnknownHandle { handle: h }) if h == handle));
    assert!(matches!(
        test.cache.poll_asynchronous_completion(handle),
        Err(Error::UnknownHandle { .. })
    ));
}

#[test]
fn test_never_issued_handles_are_rejected() {
    let test = TestCacheBuilder::new().build();
    assert!(test.cache.wait_asynchronous_completion(0).is_err());
    assert!(test.cache.get_asynchronous_results(FIRST_HANDLE).is_err());
}

#[test]
fn test_wait_then_poll_then_retrieve() {
    let test = TestCacheBuilder::new().build();
    let deriver = CountingDeriver::new("poll", b"polled");
    let handle = test.cache.get_asynchronous(deriver.boxed()).unwrap();

    test.cache.wait_asynchronous_completion(handle).unwrap();
    assert!(test.cache.poll_asynchronous_completion(handle).unwrap());
    // Waiting twice is harmless
    test.cache.wait_asynchronous_completion(handle).unwrap();

    let result = test.cache.get_asynchronous_results(handle).unwrap();
    assert_eq!(result.data, b"polled");
    assert!(result.data_was_built);
    assert_eq!(deriver.build_count(), 1);
}

#[test]
fn test_existence_check_is_idempotent() {
    let test = TestCacheBuilder::new().build();
    test.cache.put_by_key("TEST_1_present", b"here", "seed").unwrap();
    test.cache.wait_for_quiescence(false);

    for _ in 0..2 {
        assert!(test.cache.cached_data_probably_exists("TEST_1_present").unwrap());
        assert!(!test.cache.cached_data_probably_exists("TEST_1_absent").unwrap());
    }
}

#[test]
fn test_existence_batch_follows_key_order() {
    let test = TestCacheBuilder::new().build();
    let keys: Vec<String> = (0..100).map(|i| format!("TEST_1_batch{i}")).collect();
    for key in keys.iter().step_by(3) {
        test.cache.put_by_key(key, b"x", "seed").unwrap();
    }
    test.cache.wait_for_quiescence(false);

    let bits = test.cache.cached_data_probably_exists_batch(&keys).unwrap();
    assert_eq!(bits.len(), keys.len());
    for (index, exists) in bits.iter().enumerate() {
        assert_eq!(exists, index % 3 == 0, "key {index}");
    }
    assert!(!test.cache.all_cached_data_probably_exists(&keys).unwrap());

    let present: Vec<&String> = keys.iter().step_by(3).collect();
    assert!(test.cache.all_cached_data_probably_exists(&present).unwrap());
    assert!(test
        .cache
        .all_cached_data_probably_exists::<&str>(&[])
        .unwrap());
}

#[test]
fn test_existence_check_does_not_count_data() {
    let test = TestCacheBuilder::new().build();
    test.cache.put_by_key("TEST_1_sized", &[1; 4096], "seed").unwrap();
    test.cache.wait_for_quiescence(false);

    assert!(test.cache.cached_data_probably_exists("TEST_1_sized").unwrap());
    let local = test.local.usage_stats();
    assert_eq!(local.usage.get.hits, 1);
    assert_eq!(local.usage.get.bytes, 0);
}

#[test]
fn test_prefetch_backfills_local_store() {
    let test = TestCacheBuilder::new().with_shared_store().build();
    let shared = test.shared.clone().unwrap();
    let keys = ["TEST_1_remote_a", "TEST_1_remote_b"];
    for key in keys {
        test.cache.put_by_key(key, b"remote", "seed").unwrap();
    }
    test.cache.wait_for_quiescence(false);
    test.cache.mark_transient(keys[0]).unwrap();
    test.cache.mark_transient(keys[1]).unwrap();
    assert_eq!(test.local.legacy_len(), 0);
    assert_eq!(shared.legacy_len(), 2);

    assert!(test.cache.try_to_prefetch(&keys, "prefetch").unwrap());
    assert_eq!(test.local.legacy_len(), 2);

    assert!(!test
        .cache
        .try_to_prefetch(&["TEST_1_remote_a", "TEST_1_missing"], "prefetch")
        .unwrap());
    assert!(test.cache.try_to_prefetch::<&str>(&[], "empty").unwrap());
}

#[test]
fn test_mark_transient_only_touches_transient_stores() {
    let test = TestCacheBuilder::new().with_shared_store().build();
    test.cache.put_by_key("TEST_1_temp", b"temp", "seed").unwrap();
    test.cache.wait_for_quiescence(false);

    test.cache.mark_transient("TEST_1_temp").unwrap();

    assert_eq!(test.local.legacy_len(), 0);
    assert_eq!(test.shared.as_ref().unwrap().legacy_len(), 1);
    assert!(test.cache.cached_data_probably_exists("TEST_1_temp").unwrap());
}

#[test]
fn test_quiescence_after_mixed_requests() {
    let test = TestCacheBuilder::new().build();
    test.cache.put_by_key("TEST_1_hit", b"hit", "seed").unwrap();

    let mut handles = vec![
        test.cache.get_asynchronous_by_key("TEST_1_hit", "hit").unwrap(),
        test.cache.get_asynchronous_by_key("TEST_1_miss", "miss").unwrap(),
        test.cache
            .get_asynchronous(CountingDeriver::failing("fails").boxed())
            .unwrap(),
    ];
    for i in 0..8 {
        let deriver = CountingDeriver::new(&format!("ok{i}"), b"ok");
        handles.push(test.cache.get_asynchronous(deriver.boxed()).unwrap());
    }

    test.cache.wait_for_quiescence(true);
    assert!(!test.cache.any_async_requests_remaining());

    for handle in handles {
        test.cache.get_asynchronous_results(handle).unwrap();
    }
    assert!(!test.cache.any_async_requests_remaining());
}

#[test]
fn test_counter_is_exposed_on_the_cache() {
    let test = TestCacheBuilder::new().build();
    test.cache.add_to_async_completion_counter(1);
    assert!(test.cache.any_async_requests_remaining());
    test.cache.add_to_async_completion_counter(-1);
    assert!(!test.cache.any_async_requests_remaining());
}

#[test]
fn test_drop_drains_unretrieved_requests() {
    let test = TestCacheBuilder::new().build();
    let deriver = CountingDeriver::new("abandoned", b"late").not_threadsafe();
    test.cache.get_asynchronous(deriver.boxed()).unwrap();
    let local = test.local.clone();

    drop(test);

    assert_eq!(deriver.build_count(), 1);
    assert_eq!(local.legacy_len(), 1);
}

#[test]
fn test_keys_are_validated() {
    let test = TestCacheBuilder::new().build();
    assert!(matches!(
        test.cache.get_synchronous_by_key("", "empty"),
        Err(Error::InvalidKey { .. })
    ));
    assert!(test.cache.put_by_key("", b"x", "empty").is_err());
}
