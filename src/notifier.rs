//! Reclamation notifier: the queue tracked payloads post to when they die.
//!
//! The notifier is the only channel between a dying value and the table
//! that cached it. A payload does not know whether its slot is still
//! installed; it only reports its `SlotId`. `Cache::clean` decides what the
//! report means by comparing that id against the table.

use crossbeam_queue::SegQueue;
use slotmap::DefaultKey;
use std::sync::{Arc, Weak};

/// Identity of one slot: the shard holding it and its generational key
/// there. Two ids are equal only if they name the same slot instance; a key
/// reused after removal carries a newer generation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct SlotId {
    pub(crate) shard: usize,
    pub(crate) key: DefaultKey,
}

/// Lock-free MPMC queue of reclaimed slot ids, shared by a cache and every
/// tracked payload it created.
pub(crate) struct Notifier {
    queue: SegQueue<SlotId>,
}

impl Notifier {
    pub(crate) fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    #[inline]
    pub(crate) fn post(&self, id: SlotId) {
        self.queue.push(id);
    }

    #[inline]
    pub(crate) fn poll(&self) -> Option<SlotId> {
        self.queue.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration of one tracked payload with its cache's notifier.
///
/// Holds the notifier weakly: once the cache is gone there is nobody to
/// tell, and a late payload drop must not keep the queue alive.
pub(crate) struct ReclaimNotice {
    notifier: Weak<Notifier>,
    slot: SlotId,
}

impl ReclaimNotice {
    pub(crate) fn new(notifier: &Arc<Notifier>, slot: SlotId) -> Self {
        Self {
            notifier: Arc::downgrade(notifier),
            slot,
        }
    }

    /// Report the slot as reclaimed. A no-op when the cache was dropped.
    pub(crate) fn fire(&self) {
        if let Some(notifier) = self.notifier.upgrade() {
            notifier.post(self.slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn ids(n: usize) -> Vec<SlotId> {
        let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
        (0..n)
            .map(|shard| SlotId {
                shard,
                key: keys.insert(()),
            })
            .collect()
    }

    /// Invariant: reports come back out in the order they were posted.
    #[test]
    fn poll_returns_posted_ids_in_order() {
        let notifier = Notifier::new();
        let ids = ids(3);
        for id in &ids {
            notifier.post(*id);
        }
        assert_eq!(notifier.len(), 3);
        let drained: Vec<_> = std::iter::from_fn(|| notifier.poll()).collect();
        assert_eq!(drained, ids);
        assert!(notifier.poll().is_none());
    }

    /// Invariant: a notice fires into its notifier while the notifier lives,
    /// and silently does nothing once it is gone.
    #[test]
    fn notice_fires_only_while_notifier_alive() {
        let notifier = Arc::new(Notifier::new());
        let id = ids(1)[0];
        let notice = ReclaimNotice::new(&notifier, id);

        notice.fire();
        assert_eq!(notifier.poll(), Some(id));

        drop(notifier);
        notice.fire();
    }
}
