//! reclaim-cache: a concurrent key-value cache whose entries leave when
//! their values are reclaimed, when they expire, or on request.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: one cache type whose holding policy (`Strength`) decides when
//!   an entry may disappear on its own, with every disappearance reported
//!   exactly once to an optional listener.
//! - Layers:
//!   - Slot<K, V>: one entry. Holds its value through `Arc`/`Weak`
//!     according to its strength, plus an optional deadline.
//!   - Notifier: lock-free queue of slot ids. A tracked value posts its
//!     slot id when its last `Ref` drops.
//!   - SlotTable<K, V>: one shard's index from key to current slot, with
//!     generational slot ids and compare-and-remove.
//!   - KeyGates<K>: per-key critical sections so a miss runs its producer
//!     once while other keys proceed.
//!   - Cache<K, V, S>: public API. Shards tables by hash, cleans reported
//!     and expired slots before every operation, and dispatches removal
//!     notifications.
//!
//! Constraints
//! - Thread-safe: `Cache` is `Send + Sync` when its keys, values and hasher
//!   are.
//! - Stable, generational slot ids; a stale reclamation report never
//!   removes a newer slot for the same key.
//! - Each slot stores its precomputed hash; the tables never call
//!   `K: Hash`. Only `K: Eq`, and `K: Clone` for `entries`, run under a
//!   table lock.
//!
//! Drop and notification policy
//! - Table operations unlink slots and hand them back. Values are dropped,
//!   and listeners invoked, only after every table lock is released, so
//!   `Drop` for `K`/`V` and listeners may call back into the cache.
//! - A slot displaced by a write or taken by `remove`/`clear` reports the
//!   cause the caller intended, unless it had already expired (`Expired`)
//!   or lost its value (`Collected`).
//!
//! Reentrancy policy
//! - A producer passed to `get_with` and friends runs inside its key's
//!   critical section, and so does every `put`. Loading or putting the
//!   same key from inside the producer is a programming error: debug
//!   builds panic, release builds deadlock. Other keys are allowed.
//! - `clean` and `clear` unlink and report one slot at a time. A listener
//!   that panics leaves the slots and reports not yet reached in place.
//!
//! Expiration
//! - Reads treat a past deadline as absent without removing anything.
//!   `clean` sweeps expired slots and reports them. Each shard tracks its
//!   earliest deadline so the sweep skips shards with nothing due.
//! - A deadline too far in the future to represent means "never".
//!
//! Notes and non-goals
//! - No size bound and no LRU; entries leave only as described above.
//! - Reclamation timing belongs to the caller: weak values die when their
//!   last `Ref` drops, soft values after `Cache::relieve_pressure`.

mod builder;
mod cache;
mod error;
mod gate;
mod listener;
mod notifier;
mod reentrancy;
mod slot;
mod table;
mod table_proptest;

// Public surface
pub use builder::{CacheBuilder, DEFAULT_SHARDS, MAX_SHARDS};
pub use cache::{Cache, ValueInfo};
pub use error::CacheError;
pub use listener::{RemovalCause, RemovalListener};
pub use slot::{Ref, Strength};
