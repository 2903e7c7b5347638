//! Cache: the public, thread-safe front over sharded slot tables.

use crate::builder::{CacheBuilder, DEFAULT_SHARDS};
use crate::gate::KeyGates;
use crate::listener::{Eviction, RemovalCause, RemovalListener};
use crate::notifier::{Notifier, SlotId};
use crate::slot::{Ref, Slot, Strength};
use crate::table::SlotTable;
use core::borrow::Borrow;
use core::convert::Infallible;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use log::{debug, trace};
use parking_lot::RwLock;
use std::collections::hash_map::RandomState;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A value together with its own time-to-live, stored in one step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueInfo<V> {
    value: Option<V>,
    ttl: Option<Duration>,
}

impl<V> ValueInfo<V> {
    /// A value that expires after the cache's default time-to-live, if any.
    /// `None` caches a null.
    pub fn new(value: impl Into<Option<V>>) -> Self {
        Self {
            value: value.into(),
            ttl: None,
        }
    }

    /// A value that expires `ttl` after it is stored.
    pub fn with_ttl(value: impl Into<Option<V>>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            ttl: Some(ttl),
        }
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }
}

struct Shard<K, V> {
    table: RwLock<SlotTable<K, V>>,
    gates: KeyGates<K>,
}

impl<K, V> Shard<K, V>
where
    K: Eq + Hash + Clone,
{
    fn new() -> Self {
        Self {
            table: RwLock::new(SlotTable::new()),
            gates: KeyGates::new(),
        }
    }
}

// Producer outcome for `get_val_with` meaning "store nothing".
struct Declined;

/// Thread-safe cache whose entries leave when their values are reclaimed,
/// when they expire, or when a caller removes them.
///
/// Share it across threads with `Arc<Cache>`. How the cache holds values is
/// fixed at construction by its [`Strength`]:
///
/// - `Strong` caches own their values.
/// - `Weak` caches keep an entry readable only while a [`Ref`] to its value
///   exists somewhere else. Keep the `Ref` that `put` returns.
/// - `Soft` caches also retain every value until [`Cache::relieve_pressure`].
/// - `Phantom` caches never return values; they exist to report, through
///   the listener, when each stored value dies.
///
/// Every public operation first runs [`Cache::clean`], so removals caused by
/// reclamation or expiry are reported by whichever thread touches the cache
/// next. Reads also treat a past deadline as absent on their own.
///
/// # Loading
///
/// [`Cache::get_with`] runs its producer at most once per miss, per key:
/// concurrent misses on the same key wait for the first one, misses on other
/// keys proceed. `put` on a key waits for an in-flight load of that key, so
/// a producer must neither load nor put its own key in the same cache.
/// Debug builds panic when it does; release builds deadlock.
///
/// # Example
///
/// ```
/// use reclaim_cache::Cache;
///
/// let cache: Cache<&str, String> = Cache::weak();
/// let held = cache.put("greeting", "hello".to_string());
/// assert_eq!(cache.get_cloned("greeting").as_deref(), Some("hello"));
///
/// drop(held);
/// assert_eq!(cache.get("greeting"), None);
/// assert_eq!(cache.size(), 0);
/// ```
pub struct Cache<K, V, S = RandomState> {
    shards: Box<[Shard<K, V>]>,
    mask: usize,
    hasher: S,
    notifier: Arc<Notifier>,
    strength: Strength,
    ttl: Option<Duration>,
    listener: Option<Box<dyn RemovalListener<K, V>>>,
}

impl<K, V> Cache<K, V, RandomState>
where
    K: Eq + Hash + Clone,
{
    pub fn builder(strength: Strength) -> CacheBuilder<K, V, RandomState> {
        CacheBuilder::new(strength)
    }

    /// A cache that owns its values.
    pub fn strong() -> Self {
        Self::with_strength(Strength::Strong)
    }

    /// A cache that keeps each entry while its value is held elsewhere.
    pub fn weak() -> Self {
        Self::with_strength(Strength::Weak)
    }

    /// A cache that retains each value until pressure is relieved.
    pub fn soft() -> Self {
        Self::with_strength(Strength::Soft)
    }

    /// A cache that only reports, through `listener`, when values die.
    pub fn phantom<L>(listener: L) -> Self
    where
        L: RemovalListener<K, V> + 'static,
    {
        Self::from_parts(
            Strength::Phantom,
            None,
            Some(Box::new(listener)),
            DEFAULT_SHARDS,
            RandomState::new(),
        )
    }

    fn with_strength(strength: Strength) -> Self {
        Self::from_parts(strength, None, None, DEFAULT_SHARDS, RandomState::new())
    }
}

impl<K, V, S> Cache<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher,
{
    /// `shard_count` must be a power of two; the builder validates it.
    pub(crate) fn from_parts(
        strength: Strength,
        ttl: Option<Duration>,
        listener: Option<Box<dyn RemovalListener<K, V>>>,
        shard_count: usize,
        hasher: S,
    ) -> Self {
        debug_assert!(shard_count.is_power_of_two());
        debug!(
            "creating {:?} cache: {} shards, default ttl {:?}, listener {}",
            strength,
            shard_count,
            ttl,
            if listener.is_some() { "set" } else { "unset" }
        );
        let shards = (0..shard_count).map(|_| Shard::new()).collect();
        Self {
            shards,
            mask: shard_count - 1,
            hasher,
            notifier: Arc::new(Notifier::new()),
            strength,
            ttl,
            listener,
        }
    }

    pub fn strength(&self) -> Strength {
        self.strength
    }

    /// Default time-to-live for entries stored without their own.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// The non-null value cached for `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<Ref<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get_val(key).filter(|found| !found.is_null())
    }

    /// Clone of the non-null value cached for `key`.
    pub fn get_cloned<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        V: Clone,
    {
        self.get(key).and_then(|found| found.get().cloned())
    }

    /// The cached entry for `key`, null or not. `None` means no readable
    /// mapping; `Some(r)` with `r.is_null()` means a cached null.
    pub fn get_val<Q>(&self, key: &Q) -> Option<Ref<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.clean();
        let hash = self.hash_of(key);
        self.read(self.shard_index(hash), hash, key, Instant::now())
    }

    /// The entry for `key`, produced and stored on a miss. A producer
    /// returning `None` caches a null.
    pub fn get_with<T, F>(&self, key: K, produce: F) -> Ref<V>
    where
        F: FnOnce(&K) -> T,
        T: Into<Option<V>>,
    {
        match self.load(key, |k| Ok::<_, Infallible>(ValueInfo::new(produce(k)))) {
            Ok(found) => found,
            Err(never) => match never {},
        }
    }

    /// Like [`Cache::get_with`] for a fallible producer. On `Err` nothing is
    /// stored and the error is handed back unchanged.
    pub fn try_get_with<T, E, F>(&self, key: K, produce: F) -> Result<Ref<V>, E>
    where
        F: FnOnce(&K) -> Result<T, E>,
        T: Into<Option<V>>,
    {
        self.load(key, |k| produce(k).map(ValueInfo::new))
    }

    /// Like [`Cache::get_with`], but the producer may decline by returning
    /// `None`, in which case nothing is stored and `None` is returned. A
    /// produced `ValueInfo` may carry its own time-to-live.
    pub fn get_val_with<F>(&self, key: K, produce: F) -> Option<Ref<V>>
    where
        F: FnOnce(&K) -> Option<ValueInfo<V>>,
    {
        self.load(key, |k| produce(k).ok_or(Declined)).ok()
    }

    /// Store `value` for `key`, replacing any previous entry. `None` caches a
    /// null. Weak and phantom caches keep the entry only while the returned
    /// handle, or a clone of it, is alive.
    ///
    /// A `put` issued while a producer for the same key is running waits for
    /// that load to finish, so the value put last is the one kept.
    #[must_use = "weak and phantom entries die as soon as the returned Ref is dropped"]
    pub fn put(&self, key: K, value: impl Into<Option<V>>) -> Ref<V> {
        self.put_info(key, ValueInfo::new(value))
    }

    /// Store a value with its own time-to-live.
    #[must_use = "weak and phantom entries die as soon as the returned Ref is dropped"]
    pub fn put_info(&self, key: K, info: ValueInfo<V>) -> Ref<V> {
        self.clean();
        let hash = self.hash_of(&key);
        let index = self.shard_index(hash);
        let gate = self.shards[index].gates.enter(&key);
        let now = Instant::now();
        let (stored, displaced) = self.install(index, hash, key, info, now);
        drop(gate);

        if let Some(old) = displaced {
            self.dispatch(Eviction::superseded(old, RemovalCause::Replaced, now));
        }
        stored
    }

    /// Remove the entry for `key`. Returns whether there was one.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.clean();
        let now = Instant::now();
        let hash = self.hash_of(key);
        let removed = self.shards[self.shard_index(hash)]
            .table
            .write()
            .remove(hash, key);
        match removed {
            Some(slot) => {
                self.dispatch(Eviction::superseded(slot, RemovalCause::Explicit, now));
                true
            }
            None => false,
        }
    }

    /// Whether `get_val(key)` would find an entry.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.clean();
        let now = Instant::now();
        let hash = self.hash_of(key);
        self.shards[self.shard_index(hash)]
            .table
            .read()
            .lookup(hash, key)
            .map(|slot| slot.is_readable(now))
            .unwrap_or(false)
    }

    /// Make the entry for `key` expire `after` from now, keeping its value.
    /// Returns false, changing nothing, when there is no readable entry.
    /// An `after` too large to represent means the entry never expires.
    pub fn expire<Q>(&self, key: &Q, after: Duration) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.clean();
        let now = Instant::now();
        let hash = self.hash_of(key);
        let mut table = self.shards[self.shard_index(hash)].table.write();
        let Some(id) = table.find(hash, key) else {
            return false;
        };
        let deadline = now.checked_add(after);
        match table.get_mut(id) {
            Some(slot) if slot.is_readable(now) => slot.set_deadline(deadline),
            _ => return false,
        }
        if let Some(deadline) = deadline {
            table.note_deadline(deadline);
        }
        true
    }

    /// Number of entries, counting phantom entries whose values are alive.
    pub fn size(&self) -> usize {
        self.clean();
        self.shards.iter().map(|shard| shard.table.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Remove every entry, reporting each one.
    ///
    /// Entries are unlinked and reported one at a time. If the listener
    /// panics, the entries not yet reached stay in the cache.
    pub fn clear(&self) {
        let now = Instant::now();
        let mut cleared = 0usize;
        for shard in self.shards.iter() {
            let ids = shard.table.read().ids();
            for id in ids {
                let removed = shard.table.write().remove_if_current(id);
                if let Some(slot) = removed {
                    cleared += 1;
                    self.dispatch(Eviction::superseded(slot, RemovalCause::Explicit, now));
                }
            }
            shard.table.write().refresh_deadline();
        }
        debug!("clear removed {} entries", cleared);
        self.clean();
    }

    /// Remove entries whose values were reclaimed or whose deadline passed,
    /// reporting each one.
    ///
    /// Each entry is reported right after it is unlinked. If the listener
    /// panics, pending reports and expired entries are left for the next
    /// `clean`.
    pub fn clean(&self) {
        let mut collected = 0usize;
        while let Some(id) = self.notifier.poll() {
            let removed = self.shards[id.shard].table.write().remove_if_current(id.key);
            if let Some(slot) = removed {
                collected += 1;
                self.dispatch(Eviction::collected(slot));
            }
        }

        let mut expired = 0usize;
        let now = Instant::now();
        for shard in self.shards.iter() {
            let due = {
                let table = shard.table.read();
                if !table.deadline_due(now) {
                    continue;
                }
                table.expired(now)
            };
            for id in due {
                let removed = shard.table.write().remove_expired(id, now);
                if let Some(slot) = removed {
                    expired += 1;
                    self.dispatch(Eviction::expired(slot));
                }
            }
            shard.table.write().refresh_deadline();
        }

        if collected + expired > 0 {
            trace!(
                "clean removed {} collected and {} expired entries",
                collected,
                expired
            );
        }
    }

    /// Snapshot of every readable entry.
    pub fn entries(&self) -> Vec<(K, Ref<V>)> {
        self.clean();
        let now = Instant::now();
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            let table = shard.table.read();
            out.extend(
                table
                    .iter()
                    .filter_map(|(_, slot)| slot.read(now).map(|found| (slot.key().clone(), found))),
            );
        }
        out
    }

    /// Simulate memory pressure: soft caches stop retaining their values,
    /// so every value not held outside the cache is reclaimed. Returns how
    /// many retained values were released. A no-op for other strengths.
    pub fn relieve_pressure(&self) -> usize {
        let mut released = Vec::new();
        for shard in self.shards.iter() {
            released.extend(shard.table.write().release_retained());
        }
        let count = released.len();
        drop(released);
        if count > 0 {
            debug!("released {} retained values", count);
        }
        count
    }

    fn load<E, F>(&self, key: K, produce: F) -> Result<Ref<V>, E>
    where
        F: FnOnce(&K) -> Result<ValueInfo<V>, E>,
    {
        self.clean();
        let hash = self.hash_of(&key);
        let index = self.shard_index(hash);
        if let Some(found) = self.read(index, hash, &key, Instant::now()) {
            return Ok(found);
        }

        let gate = self.shards[index].gates.enter(&key);
        if let Some(found) = self.read(index, hash, &key, Instant::now()) {
            return Ok(found);
        }
        let info = produce(&key)?;
        let now = Instant::now();
        let (stored, displaced) = self.install(index, hash, key, info, now);
        drop(gate);

        if let Some(old) = displaced {
            self.dispatch(Eviction::superseded(old, RemovalCause::Replaced, now));
        }
        Ok(stored)
    }

    fn read<Q>(&self, index: usize, hash: u64, key: &Q, now: Instant) -> Option<Ref<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.shards[index]
            .table
            .read()
            .lookup(hash, key)
            .and_then(|slot| slot.read(now))
    }

    fn install(
        &self,
        index: usize,
        hash: u64,
        key: K,
        info: ValueInfo<V>,
        now: Instant,
    ) -> (Ref<V>, Option<Slot<K, V>>) {
        let deadline = info.ttl.or(self.ttl).and_then(|ttl| now.checked_add(ttl));
        let strength = self.strength;
        let notifier = &self.notifier;
        let value = info.value;
        self.shards[index].table.write().insert_with(hash, key, |key, slot_key| {
            let id = SlotId {
                shard: index,
                key: slot_key,
            };
            Slot::new(strength, key, hash, value, deadline, id, notifier)
        })
    }

    fn dispatch(&self, eviction: Eviction<K, V>) {
        eviction.notify(self.listener.as_deref());
    }

    #[inline]
    fn hash_of<Q: ?Sized + Hash>(&self, key: &Q) -> u64 {
        self.hasher.hash_one(key)
    }

    // The table probes with the low bits and tags with the top seven, so
    // shards are picked from the middle.
    #[inline]
    fn shard_index(&self, hash: u64) -> usize {
        ((hash >> 32) as usize) & self.mask
    }
}

impl<K, V, S> fmt::Debug for Cache<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("strength", &self.strength)
            .field("shards", &self.shards.len())
            .field("ttl", &self.ttl)
            .field("pending_reclaims", &self.notifier.len())
            .finish_non_exhaustive()
    }
}
