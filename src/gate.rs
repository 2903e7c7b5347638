//! Per-key critical sections for loads.
//!
//! Each shard keeps a map from key to a gate mutex. A gate exists only
//! while some thread is inside or waiting on it; the last one out removes
//! it. Gates are taken without holding any table lock, so a slow producer
//! delays other loads of the same key and nothing else.

use crate::reentrancy::{self, ReentrancyGuard};
use core::hash::Hash;
use hashbrown::HashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::sync::Arc;

type Gate = Arc<Mutex<()>>;

pub(crate) struct KeyGates<K> {
    gates: Mutex<HashMap<K, Gate>>,
}

impl<K> KeyGates<K>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Block until this thread is the only one inside the section for `key`.
    ///
    /// Entering the same key again on this thread before the guard drops
    /// deadlocks; debug builds panic instead.
    pub(crate) fn enter(&self, key: &K) -> KeyGuard<'_, K> {
        let gate = {
            let mut gates = self.gates.lock();
            match gates.get(key) {
                Some(gate) => Arc::clone(gate),
                None => {
                    let gate = Gate::default();
                    gates.insert(key.clone(), Arc::clone(&gate));
                    gate
                }
            }
        };
        let reentry = reentrancy::enter(Arc::as_ptr(&gate) as usize);
        let held = gate.lock_arc();
        KeyGuard {
            owner: self,
            key: key.clone(),
            held: Some(held),
            _reentry: reentry,
        }
    }

    #[cfg(test)]
    pub(crate) fn open_gates(&self) -> usize {
        self.gates.lock().len()
    }
}

impl<K> Default for KeyGates<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one key's critical section.
pub(crate) struct KeyGuard<'a, K>
where
    K: Eq + Hash + Clone,
{
    owner: &'a KeyGates<K>,
    key: K,
    held: Option<ArcMutexGuard<RawMutex, ()>>,
    _reentry: ReentrancyGuard,
}

impl<K> Drop for KeyGuard<'_, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        // Waiters clone the gate under the map lock, so the count is stable
        // here: the map and this guard are the only holders iff nobody waits.
        let mut gates = self.owner.gates.lock();
        if let Some(held) = self.held.take() {
            if Arc::strong_count(ArcMutexGuard::mutex(&held)) == 2 {
                gates.remove(&self.key);
            }
            drop(held);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    /// Invariant: at most one thread is inside a key's section at a time.
    #[test]
    fn same_key_is_exclusive() {
        let gates = Arc::new(KeyGates::<u32>::new());
        let inside = Arc::new(AtomicBool::new(false));
        let entries = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gates = Arc::clone(&gates);
                let inside = Arc::clone(&inside);
                let entries = Arc::clone(&entries);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let _g = gates.enter(&7);
                        assert!(!inside.swap(true, Ordering::SeqCst), "two threads inside one section");
                        entries.fetch_add(1, Ordering::Relaxed);
                        inside.store(false, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(entries.load(Ordering::Relaxed), 400);
        assert_eq!(gates.open_gates(), 0);
    }

    /// Invariant: holding one key's section never blocks another key.
    #[test]
    fn different_keys_do_not_block() {
        let gates = Arc::new(KeyGates::<&'static str>::new());
        let _held = gates.enter(&"a");

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&gates);
        let worker = thread::spawn(move || {
            let _g = other.enter(&"b");
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(5))
            .expect("entering another key must not wait");
        worker.join().unwrap();
    }

    /// Invariant: a gate is removed once its last user leaves, and a waiter
    /// keeps it registered until it is done.
    #[test]
    fn gates_are_removed_when_unused() {
        let gates = Arc::new(KeyGates::<u32>::new());
        let first = gates.enter(&1);
        assert_eq!(gates.open_gates(), 1);

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let gates = Arc::clone(&gates);
            thread::spawn(move || {
                tx.send(()).unwrap();
                let _g = gates.enter(&1);
            })
        };
        rx.recv().unwrap();
        drop(first);
        waiter.join().unwrap();
        assert_eq!(gates.open_gates(), 0);
    }
}
