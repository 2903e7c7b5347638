//! Reclaimable slots: one cached value, its tracking strength and deadline.
//!
//! A value lives in a reference-counted `Payload`. Callers hold it through
//! `Ref`; the slot holds it strongly or weakly depending on its `Strength`.
//! Tracked payloads carry a `ReclaimNotice` and report their slot id when
//! the last strong handle goes away. That drop is this crate's memory
//! reclaimer: deterministic, and at most one report per payload.

use crate::notifier::{Notifier, ReclaimNotice, SlotId};
use core::fmt;
use core::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use std::time::Instant;

/// How a cache holds on to its values.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Strength {
    /// The cache owns its values. Entries leave only by write, clear or
    /// expiration.
    Strong,
    /// The cache observes its values. An entry stays readable while some
    /// `Ref` to its value exists outside the cache.
    Weak,
    /// Like `Weak`, but the cache also retains each value until
    /// `Cache::relieve_pressure` releases it.
    Soft,
    /// The cache never hands values back out. Entries exist only so their
    /// reclamation is reported.
    Phantom,
}

impl Strength {
    /// Whether values of this strength report to the notifier when they die.
    #[inline]
    pub fn is_tracked(self) -> bool {
        !matches!(self, Strength::Strong)
    }
}

struct Payload<V> {
    // `None` is a cached null, not a missing value.
    value: Option<V>,
    notice: Option<ReclaimNotice>,
}

impl<V> Drop for Payload<V> {
    fn drop(&mut self) {
        if let Some(notice) = &self.notice {
            notice.fire();
        }
    }
}

/// Strong handle to a cached value.
///
/// Cloning is cheap. For weak, soft and phantom caches, holding a `Ref` is
/// what keeps the entry alive; dropping the last one reports the entry as
/// reclaimed. Equality and hashing follow payload identity, not the value.
pub struct Ref<V> {
    payload: Arc<Payload<V>>,
}

impl<V> Ref<V> {
    /// The cached value, or `None` when a null was cached.
    #[inline]
    pub fn get(&self) -> Option<&V> {
        self.payload.value.as_ref()
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.payload.value.is_none()
    }

    /// Whether both handles point at the same cached payload.
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.payload, &other.payload)
    }
}

impl<V> Clone for Ref<V> {
    fn clone(&self) -> Self {
        Self {
            payload: Arc::clone(&self.payload),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Ref<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ref").field(&self.get()).finish()
    }
}

impl<V> PartialEq for Ref<V> {
    fn eq(&self, other: &Self) -> bool {
        Ref::ptr_eq(self, other)
    }
}

impl<V> Eq for Ref<V> {}

impl<V> Hash for Ref<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.payload) as *const () as usize).hash(state);
    }
}

enum Hold<V> {
    Strong(Arc<Payload<V>>),
    Weak(Weak<Payload<V>>),
    Soft {
        weak: Weak<Payload<V>>,
        retained: Option<Arc<Payload<V>>>,
    },
    Phantom(Weak<Payload<V>>),
}

/// One table entry. Stores its own key and hash: the notifier yields only
/// slot ids, and re-indexing never calls back into `K: Hash`.
pub(crate) struct Slot<K, V> {
    key: K,
    hash: u64,
    hold: Hold<V>,
    deadline: Option<Instant>,
}

impl<K, V> Slot<K, V> {
    /// Build the slot installed under `id`, plus the strong handle returned
    /// to whoever stored it. Phantom slots ignore `deadline`: a value that is
    /// never readable cannot expire.
    pub(crate) fn new(
        strength: Strength,
        key: K,
        hash: u64,
        value: Option<V>,
        deadline: Option<Instant>,
        id: SlotId,
        notifier: &Arc<Notifier>,
    ) -> (Self, Ref<V>) {
        let notice = strength
            .is_tracked()
            .then(|| ReclaimNotice::new(notifier, id));
        let payload = Arc::new(Payload { value, notice });
        let (hold, deadline) = match strength {
            Strength::Strong => (Hold::Strong(Arc::clone(&payload)), deadline),
            Strength::Weak => (Hold::Weak(Arc::downgrade(&payload)), deadline),
            Strength::Soft => (
                Hold::Soft {
                    weak: Arc::downgrade(&payload),
                    retained: Some(Arc::clone(&payload)),
                },
                deadline,
            ),
            Strength::Phantom => (Hold::Phantom(Arc::downgrade(&payload)), None),
        };
        let slot = Slot {
            key,
            hash,
            hold,
            deadline,
        };
        (slot, Ref { payload })
    }

    #[inline]
    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    #[inline]
    pub(crate) fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn set_deadline(&mut self, deadline: Option<Instant>) {
        if !matches!(self.hold, Hold::Phantom(_)) {
            self.deadline = deadline;
        }
    }

    #[inline]
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }

    /// The value behind this slot, if the tracking relation still reaches
    /// it. Ignores the deadline. Always `None` for phantom slots.
    pub(crate) fn ref_value(&self) -> Option<Ref<V>> {
        let payload = match &self.hold {
            Hold::Strong(payload) => Some(Arc::clone(payload)),
            Hold::Weak(weak) | Hold::Soft { weak, .. } => weak.upgrade(),
            Hold::Phantom(_) => None,
        };
        payload.map(|payload| Ref { payload })
    }

    /// Read path: `ref_value` unless the deadline has passed.
    pub(crate) fn read(&self, now: Instant) -> Option<Ref<V>> {
        if self.is_expired(now) {
            return None;
        }
        self.ref_value()
    }

    /// Same answer as `read(now).is_some()` without minting a handle.
    pub(crate) fn is_readable(&self, now: Instant) -> bool {
        if self.is_expired(now) {
            return false;
        }
        match &self.hold {
            Hold::Strong(_) => true,
            Hold::Weak(weak) | Hold::Soft { weak, .. } => weak.strong_count() > 0,
            Hold::Phantom(_) => false,
        }
    }

    /// Whether the value is already gone. Phantom slots count too: their
    /// value is unreadable but still tracked.
    pub(crate) fn is_reclaimed(&self) -> bool {
        match &self.hold {
            Hold::Strong(_) => false,
            Hold::Weak(weak) | Hold::Phantom(weak) | Hold::Soft { weak, .. } => {
                weak.strong_count() == 0
            }
        }
    }

    /// Give up a soft slot's own strong handle. The handle is returned so
    /// the caller can drop it after releasing its locks.
    pub(crate) fn release_retained(&mut self) -> Option<Ref<V>> {
        match &mut self.hold {
            Hold::Soft { retained, .. } => retained.take().map(|payload| Ref { payload }),
            _ => None,
        }
    }
}
