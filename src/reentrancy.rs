//! Debug-only reentrancy guard for per-key critical sections.
//!
//! A producer that calls back into the cache for the key it is loading
//! would wait on its own gate forever. In debug builds the current thread
//! records every gate it holds, and entering one of them again panics
//! instead of deadlocking. In release builds this compiles to a no-op and
//! the deadlock is the caller's problem.

use core::marker::PhantomData;
#[cfg(debug_assertions)]
use std::cell::RefCell;

#[cfg(debug_assertions)]
thread_local! {
    static HELD: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Enter the critical section identified by `id` on this thread. In debug
/// builds, panics if this thread is already inside it.
#[inline]
pub(crate) fn enter(id: usize) -> ReentrancyGuard {
    #[cfg(debug_assertions)]
    {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            assert!(
                !held.contains(&id),
                "reentrancy detected: producer re-entered the cache for the key it is loading"
            );
            held.push(id);
        });
        ReentrancyGuard {
            id,
            _nosend: PhantomData,
        }
    }

    #[cfg(not(debug_assertions))]
    {
        let _ = id;
        ReentrancyGuard {
            _nosend: PhantomData,
        }
    }
}

/// RAII guard returned by `enter`. Must be dropped on the thread that
/// created it.
pub(crate) struct ReentrancyGuard {
    #[cfg(debug_assertions)]
    id: usize,
    _nosend: PhantomData<*mut ()>,
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            HELD.with(|held| {
                let mut held = held.borrow_mut();
                if let Some(pos) = held.iter().rposition(|&h| h == self.id) {
                    held.swap_remove(pos);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::enter;

    #[test]
    fn enter_and_exit_is_ok() {
        let _g = enter(1);
    }

    #[test]
    fn distinct_sections_nest() {
        let _g1 = enter(1);
        let _g2 = enter(2);
    }

    #[test]
    fn section_can_be_reentered_after_exit() {
        drop(enter(3));
        let _g = enter(3);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn reentrancy_panics_in_debug() {
        let res = std::panic::catch_unwind(|| {
            let _g1 = enter(4);
            // Re-entering should panic in debug builds
            let _g2 = enter(4);
        });
        assert!(res.is_err(), "expected reentrancy to panic in debug builds");
        // The outer guard was released during unwinding.
        let _g = enter(4);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn other_threads_do_not_count_as_reentry() {
        let _g = enter(5);
        std::thread::spawn(|| {
            let _g = enter(5);
        })
        .join()
        .unwrap();
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn reentrancy_noop_in_release() {
        let _g1 = enter(6);
        let _g2 = enter(6);
        let (_g1, _g2) = (_g1, _g2);
    }
}
