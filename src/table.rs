//! SlotTable: one shard's key -> slot map with stable, generational slot ids.
//!
//! Slots live in a `SlotMap`; a `HashTable` indexes the current slot for
//! each key. The cache computes hashes once with its own `BuildHasher` and
//! passes them in, and every slot keeps its hash, so the table never calls
//! `K: Hash` itself. Only `K: Eq` runs during probing.
//!
//! Nothing here drops user values. Every removal hands the unlinked slot
//! back so the caller can drop it, or notify about it, after releasing the
//! shard lock.

use crate::slot::{Ref, Slot};
use core::borrow::Borrow;
use hashbrown::hash_table::Entry;
use hashbrown::HashTable;
use slotmap::{DefaultKey, SlotMap};
use std::time::Instant;

pub(crate) struct SlotTable<K, V> {
    index: HashTable<DefaultKey>,
    slots: SlotMap<DefaultKey, Slot<K, V>>, // storage using generational keys
    // No slot has a deadline earlier than this. May be stale-early after
    // removals; never late.
    next_deadline: Option<Instant>,
}

impl<K, V> SlotTable<K, V>
where
    K: Eq,
{
    pub(crate) fn new() -> Self {
        Self {
            index: HashTable::new(),
            slots: SlotMap::with_key(),
            next_deadline: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn find<Q>(&self, hash: u64, q: &Q) -> Option<DefaultKey>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.index
            .find(hash, |&k| {
                self.slots
                    .get(k)
                    .map(|s| s.key().borrow() == q)
                    .unwrap_or(false)
            })
            .copied()
    }

    pub(crate) fn lookup<Q>(&self, hash: u64, q: &Q) -> Option<&Slot<K, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.find(hash, q).and_then(|k| self.slots.get(k))
    }

    #[cfg(test)]
    pub(crate) fn get(&self, id: DefaultKey) -> Option<&Slot<K, V>> {
        self.slots.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: DefaultKey) -> Option<&mut Slot<K, V>> {
        self.slots.get_mut(id)
    }

    /// Install a new slot for `key`, built by `make` from the key and the
    /// slot's own id. Returns `make`'s extra output and the slot this one
    /// displaced, already unlinked.
    pub(crate) fn insert_with<R, F>(&mut self, hash: u64, key: K, make: F) -> (R, Option<Slot<K, V>>)
    where
        F: FnOnce(K, DefaultKey) -> (Slot<K, V>, R),
    {
        let mut made = None;
        let id = self.slots.insert_with_key(|id| {
            let (slot, out) = make(key, id);
            made = Some(out);
            slot
        });
        let made = made.expect("insert_with_key runs its closure exactly once");

        let slots = &self.slots;
        let key = slots[id].key();
        let entry = self.index.entry(
            hash,
            |&kk| kk != id && slots.get(kk).map(|s| s.key() == key).unwrap_or(false),
            |&kk| slots.get(kk).map(|s| s.hash()).unwrap_or(0),
        );
        let previous = match entry {
            Entry::Occupied(mut o) => Some(core::mem::replace(o.get_mut(), id)),
            Entry::Vacant(v) => {
                let _ = v.insert(id);
                None
            }
        };

        if let Some(deadline) = self.slots[id].deadline() {
            self.note_deadline(deadline);
        }
        let displaced = previous.and_then(|old| self.slots.remove(old));
        (made, displaced)
    }

    /// Unlink and return the current slot for `q`.
    pub(crate) fn remove<Q>(&mut self, hash: u64, q: &Q) -> Option<Slot<K, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let id = self.find(hash, q)?;
        self.remove_if_current(id)
    }

    /// Compare-and-remove: unlink the slot `id` only if the index still maps
    /// its key to exactly this slot. A stale id (superseded, removed, or
    /// reused with a newer generation) leaves the table untouched.
    pub(crate) fn remove_if_current(&mut self, id: DefaultKey) -> Option<Slot<K, V>> {
        let hash = self.slots.get(id)?.hash();
        match self.index.find_entry(hash, |&kk| kk == id) {
            Ok(occupied) => {
                occupied.remove();
                self.slots.remove(id)
            }
            Err(_) => None,
        }
    }

    /// Ids of every slot, for callers that unlink them one at a time.
    pub(crate) fn ids(&self) -> Vec<DefaultKey> {
        self.slots.keys().collect()
    }

    pub(crate) fn note_deadline(&mut self, deadline: Instant) {
        self.next_deadline = Some(match self.next_deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        });
    }

    /// Whether some slot may have expired by `now`.
    pub(crate) fn deadline_due(&self, now: Instant) -> bool {
        matches!(self.next_deadline, Some(deadline) if now >= deadline)
    }

    /// Ids of the slots whose deadline has passed by `now`.
    pub(crate) fn expired(&self, now: Instant) -> Vec<DefaultKey> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.is_expired(now))
            .map(|(id, _)| id)
            .collect()
    }

    /// Unlink slot `id` if it is current and still expired at `now`. A
    /// deadline moved by `expire` since `id` was listed keeps the slot.
    pub(crate) fn remove_expired(&mut self, id: DefaultKey, now: Instant) -> Option<Slot<K, V>> {
        if !self.slots.get(id)?.is_expired(now) {
            return None;
        }
        self.remove_if_current(id)
    }

    /// Recompute the earliest deadline from the slots still present.
    pub(crate) fn refresh_deadline(&mut self) {
        self.next_deadline = self.slots.values().filter_map(|s| s.deadline()).min();
    }

    /// Drop every soft slot's retained handle, handing the handles back.
    pub(crate) fn release_retained(&mut self) -> Vec<Ref<V>> {
        self.slots
            .values_mut()
            .filter_map(|slot| slot.release_retained())
            .collect()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (DefaultKey, &Slot<K, V>)> {
        self.slots.iter()
    }
}

impl<K: Eq, V> Default for SlotTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
