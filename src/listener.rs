//! Removal notifications.
//!
//! Every slot that leaves a cache's table becomes one `Eviction`. The table
//! operation that unlinked it decides the intended cause; `superseded`
//! corrects that cause when the slot was already dark (expired or
//! reclaimed) at the time. Evictions are dispatched only after the cache
//! has released every lock.

use crate::slot::{Ref, Slot};
use std::time::Instant;

/// Why an entry left the cache.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RemovalCause {
    /// The entry's deadline passed.
    Expired,
    /// A write installed a new value for the same key.
    Replaced,
    /// `remove` or `clear` took the entry out.
    Explicit,
    /// The value was reclaimed because nothing held it any more.
    Collected,
}

impl RemovalCause {
    /// Whether the cache dropped the entry on its own, as opposed to a
    /// caller asking for it.
    pub fn was_evicted(self) -> bool {
        matches!(self, RemovalCause::Expired | RemovalCause::Collected)
    }
}

/// Observer of entries leaving a cache.
///
/// Called synchronously on the thread whose operation removed the entry,
/// with no cache lock held, so it may call back into the cache. A panic
/// propagates to that caller after the removal has taken effect.
///
/// `value` is the removed value while it is still reachable; `None` for
/// `Collected` removals and for every removal from a phantom cache.
pub trait RemovalListener<K, V>: Send + Sync {
    fn on_removal(&self, key: &K, value: Option<Ref<V>>, cause: RemovalCause);
}

impl<K, V, F> RemovalListener<K, V> for F
where
    F: Fn(&K, Option<Ref<V>>, RemovalCause) + Send + Sync,
{
    fn on_removal(&self, key: &K, value: Option<Ref<V>>, cause: RemovalCause) {
        self(key, value, cause)
    }
}

/// A slot already unlinked from its table, waiting to be reported.
pub(crate) struct Eviction<K, V> {
    slot: Slot<K, V>,
    cause: RemovalCause,
}

impl<K, V> Eviction<K, V> {
    pub(crate) fn collected(slot: Slot<K, V>) -> Self {
        Self {
            slot,
            cause: RemovalCause::Collected,
        }
    }

    pub(crate) fn expired(slot: Slot<K, V>) -> Self {
        Self {
            slot,
            cause: RemovalCause::Expired,
        }
    }

    /// Classify a slot displaced by a write or taken by `remove`/`clear`.
    /// A slot whose deadline had passed reports `Expired`; one whose value
    /// was already reclaimed reports `Collected`. A phantom slot whose value
    /// is still alive keeps `intended`, even though readers never saw it.
    pub(crate) fn superseded(slot: Slot<K, V>, intended: RemovalCause, now: Instant) -> Self {
        let cause = if slot.is_expired(now) {
            RemovalCause::Expired
        } else if slot.is_reclaimed() {
            RemovalCause::Collected
        } else {
            intended
        };
        Self { slot, cause }
    }

    #[cfg(test)]
    pub(crate) fn cause(&self) -> RemovalCause {
        self.cause
    }

    /// Report to `listener`, if any, then drop the slot.
    pub(crate) fn notify(self, listener: Option<&dyn RemovalListener<K, V>>) {
        let Eviction { slot, cause } = self;
        if let Some(listener) = listener {
            let value = match cause {
                RemovalCause::Collected => None,
                _ => slot.ref_value(),
            };
            listener.on_removal(slot.key(), value, cause);
        }
    }
}
