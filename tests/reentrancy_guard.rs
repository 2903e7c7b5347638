use reclaim_cache::Cache;
use std::panic::{catch_unwind, AssertUnwindSafe};

#[test]
fn nested_load_of_other_key_is_ok() {
    let cache: Cache<u32, u32> = Cache::strong();
    let outer = cache.get_with(1, |_| {
        let inner = cache.get_with(2, |_| 20);
        inner.get().map(|v| v + 1)
    });
    assert_eq!(outer.get(), Some(&21));
    assert_eq!(cache.get_cloned(&2), Some(20));
}

#[cfg(debug_assertions)]
#[test]
fn reentrant_load_panics_in_debug() {
    let cache: Cache<u32, u32> = Cache::strong();
    let res = catch_unwind(AssertUnwindSafe(|| {
        // Re-entering the same key should panic in debug builds
        cache.get_with(1, |_| cache.get_with(1, |_| 2).get().copied())
    }));
    assert!(res.is_err(), "expected reentrancy to panic in debug builds");

    // The key was released during unwinding and nothing was stored.
    assert!(!cache.contains(&1));
    let loaded = cache.get_with(1, |_| 3);
    assert_eq!(loaded.get(), Some(&3));
}

#[cfg(debug_assertions)]
#[test]
fn put_of_loading_key_panics_in_debug() {
    let cache: Cache<u32, u32> = Cache::strong();
    let res = catch_unwind(AssertUnwindSafe(|| {
        // put waits on the key the producer already holds
        cache.get_with(1, |_| {
            let _ = cache.put(1, 2);
            3
        })
    }));
    assert!(res.is_err(), "expected a put of the loading key to panic in debug builds");

    assert!(!cache.contains(&1));
    let _ = cache.put(1, 4);
    assert_eq!(cache.get_cloned(&1), Some(4));
}
