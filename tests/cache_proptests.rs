// Cache property tests.
//
// Property 1: weak-cache liveness matches outstanding Refs per key.
//  - Model: per key, the Refs held to its current value, plus the last
//    value written. Refs to replaced values move to an orphan pile.
//  - Invariant: contains(key) == !current[k].is_empty();
//               size() == count(keys with !current[k].is_empty()).
//  - Operations: put, get, clone, drop-one, drop-all, drop-orphans,
//    remove.
//  - Accessor check: a successful get returns the last value written.
//
// Property 2: conservation of notifications.
//  - Every entry ever created is either still in the cache or has been
//    reported exactly once: created == size() + notifications.
use parking_lot::Mutex;
use proptest::prelude::*;
use reclaim_cache::{Cache, Ref, RemovalCause, Strength};
use std::sync::Arc;

fn arb_ops() -> impl Strategy<Value = (usize, Vec<(u8, usize)>)> {
    (
        1usize..=5,
        proptest::collection::vec((0u8..=6u8, 0usize..100usize), 1..100),
    )
}

proptest! {
    #[test]
    fn prop_weak_cache_liveness((keys, ops) in arb_ops()) {
        let events: Arc<Mutex<Vec<RemovalCause>>> = Arc::default();
        let sink = Arc::clone(&events);
        let cache: Cache<String, i32> = Cache::builder(Strength::Weak)
            .shards(2)
            .listener(move |_: &String, _: Option<Ref<i32>>, cause: RemovalCause| sink.lock().push(cause))
            .build()
            .unwrap();

        let mut current: Vec<Vec<Ref<i32>>> = vec![Vec::new(); keys];
        let mut last: Vec<i32> = vec![0; keys];
        let mut orphans: Vec<Ref<i32>> = Vec::new();
        let mut created = 0usize;

        for (step, (op, raw_k)) in ops.into_iter().enumerate() {
            let k = raw_k % keys;
            let key = format!("k{}", k);
            match op {
                // Put a fresh value; refs to the old one no longer keep the key.
                0 => {
                    let value = step as i32;
                    let r = cache.put(key.clone(), value);
                    created += 1;
                    orphans.append(&mut current[k]);
                    current[k].push(r);
                    last[k] = value;
                }
                // Get returns a new Ref to the current value if present.
                1 => {
                    if let Some(r) = cache.get(&key) {
                        prop_assert_eq!(r.get().copied(), Some(last[k]));
                        current[k].push(r);
                    }
                }
                // Clone one existing Ref for this key.
                2 => {
                    if let Some(existing) = current[k].last().cloned() {
                        current[k].push(existing);
                    }
                }
                // Drop one existing Ref for this key.
                3 => {
                    current[k].pop();
                }
                // Drop all Refs for this key.
                4 => {
                    current[k].clear();
                }
                // Drop Refs to replaced values; must not disturb current ones.
                5 => {
                    orphans.clear();
                }
                // Explicit removal; held Refs stay valid but no longer map.
                6 => {
                    let removed = cache.remove(&key);
                    prop_assert_eq!(removed, !current[k].is_empty());
                    orphans.append(&mut current[k]);
                }
                _ => unreachable!(),
            }

            // Invariant after each step: presence matches whether there is ≥1 Ref to the current value.
            prop_assert_eq!(cache.contains(&key), !current[k].is_empty());
        }

        let expected_len = current.iter().filter(|v| !v.is_empty()).count();
        prop_assert_eq!(cache.size(), expected_len);
        prop_assert_eq!(created, cache.size() + events.lock().len());

        drop(current);
        drop(orphans);
        prop_assert_eq!(cache.size(), 0);
        prop_assert_eq!(created, events.lock().len());
    }
}
