#![cfg(test)]

// Property tests for SlotTable kept inside the crate so they can reach the
// internal table and slot types.

use crate::notifier::{Notifier, SlotId};
use crate::slot::{Ref, Slot, Strength};
use crate::table::SlotTable;
use proptest::prelude::*;
use slotmap::DefaultKey;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Pool-indexed operations to improve shrinking: indices shrink to earlier keys,
// pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    Remove(usize),
    Find(usize),
    Contains(String),
    ReclaimStale,
    Iterate,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=8).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            3 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            1 => idx.clone().prop_map(OpI::Remove),
            1 => idx.clone().prop_map(OpI::Find),
            1 => prop_oneof![
                contains_pool.prop_map(|s: String| s),
                "[a-z]{0,5}".prop_map(|s| s)
            ]
            .prop_map(OpI::Contains),
            1 => Just(OpI::ReclaimStale),
            1 => Just(OpI::Iterate),
        ];
        proptest::collection::vec(op, 1..60).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Hash supplied by the caller, as the cache does.
fn hash_of(s: &str, collide: bool) -> u64 {
    if collide {
        return 0;
    }
    s.bytes().fold(0xcbf29ce484222325, |acc, b| {
        (acc ^ b as u64).wrapping_mul(0x100000001b3)
    })
}

fn insert(
    table: &mut SlotTable<Key, i32>,
    notifier: &Arc<Notifier>,
    hash: u64,
    key: Key,
    value: i32,
) -> (DefaultKey, Ref<i32>, Option<Slot<Key, i32>>) {
    let ((id, handle), displaced) = table.insert_with(hash, key, |k, id| {
        let slot_id = SlotId { shard: 0, key: id };
        let (slot, handle) = Slot::new(Strength::Strong, k, hash, Some(value), None, slot_id, notifier);
        (slot, (id, handle))
    });
    (id, handle, displaced)
}

fn run_state_machine(pool: Vec<String>, ops: Vec<OpI>, collide: bool) -> Result<(), TestCaseError> {
    let notifier = Arc::new(Notifier::new());
    let mut sut: SlotTable<Key, i32> = SlotTable::new();
    let mut model: HashMap<Key, i32> = HashMap::new();
    let mut live: HashMap<Key, DefaultKey> = HashMap::new();
    let mut stale: Vec<DefaultKey> = Vec::new();

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = key_from(&pool, i);
                let h = hash_of(&k.0, collide);
                let (id, _, displaced) = insert(&mut sut, &notifier, h, k.clone(), v);
                match (displaced, model.insert(k.clone(), v)) {
                    (Some(old), Some(mv)) => {
                        prop_assert!(old.key() == &k);
                        let ov = old.ref_value().and_then(|r| r.get().copied());
                        prop_assert_eq!(ov, Some(mv));
                    }
                    (None, None) => {}
                    (d, m) => prop_assert!(false, "displaced {:?} but model had {:?}", d.is_some(), m),
                }
                if let Some(old) = live.insert(k, id) {
                    stale.push(old);
                }
            }
            OpI::Remove(i) => {
                let k = key_from(&pool, i);
                let removed = sut.remove(hash_of(&k.0, collide), k.0.as_str());
                match (removed, model.remove(&k)) {
                    (Some(slot), Some(mv)) => {
                        prop_assert!(slot.key() == &k);
                        let v = slot.ref_value().and_then(|r| r.get().copied());
                        prop_assert_eq!(v, Some(mv));
                        let id = live.remove(&k).expect("tracked live id present");
                        stale.push(id);
                    }
                    (None, None) => {}
                    (r, m) => prop_assert!(false, "removed {:?} but model had {:?}", r.is_some(), m),
                }
            }
            OpI::Find(i) => {
                let k = key_from(&pool, i);
                let found = sut.find(hash_of(&k.0, collide), k.0.as_str());
                prop_assert_eq!(found.is_some(), model.contains_key(&k));
                if let Some(id) = found {
                    // If present, the id must be the one installed last.
                    let &lid = live.get(&k).expect("tracked live id present");
                    prop_assert_eq!(id, lid);
                }
            }
            OpI::Contains(s) => {
                let has = sut.lookup(hash_of(&s, collide), s.as_str()).is_some();
                let has_model = model.keys().any(|k| k.0 == s);
                prop_assert_eq!(has, has_model);
            }
            OpI::ReclaimStale => {
                // Late reports for superseded or removed slots change nothing.
                for &id in &stale {
                    prop_assert!(sut.remove_if_current(id).is_none());
                }
            }
            OpI::Iterate => {
                let s_keys: BTreeSet<_> = sut.iter().map(|(_, s)| s.key().clone()).collect();
                let m_keys: BTreeSet<_> = model.keys().cloned().collect();
                prop_assert_eq!(s_keys, m_keys);
            }
        }

        // Post-conditions after each op
        // 1) Stale ids never resolve
        for &id in &stale {
            prop_assert!(sut.get(id).is_none());
        }
        // 2) Size parity
        prop_assert_eq!(sut.len(), model.len());
    }
    Ok(())
}

// Property: State-machine equivalence against std::collections::HashMap.
// Invariants exercised across random operation sequences:
// - One slot per key; a write hands back the slot it displaced.
// - `find`/`lookup` parity, and `find` returns the id installed last.
// - `remove` hands back the slot matching the model.
// - Stale ids never resolve and compare-and-remove ignores them.
// - `iter` yields each live key exactly once; `len` parity with the model.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run_state_machine(pool, ops, false)?;
    }

    // Collision variant: every key hashes alike, so only equality resolves.
    #[test]
    fn prop_state_machine_collisions((pool, ops) in arb_scenario()) {
        run_state_machine(pool, ops, true)?;
    }
}
