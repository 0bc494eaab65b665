//! A [`crate::shared_mutex::SharedMutex`] variant where a thread already
//! holding the read lock can take it again without the writer-preference
//! check deadlocking it against itself.
//!
//! Recursion is tracked per-thread in a `thread_local!` map from mutex
//! address to hold count, rather than a true intrusive per-thread list —
//! see `DESIGN.md`. Only the read side recurses; a thread that already
//! holds the write lock calling `write()` again still deadlocks, matching
//! the non-recursive exclusive side of most reader-writer locks.
#![expect(unsafe_code, reason = "guard access to the UnsafeCell is gated by the reader/writer state")]

use core::cell::{RefCell, UnsafeCell};
use core::fmt;
use core::ops::Deref;
use std::collections::HashMap;

use nova_os::sync::atomic::{AtomicU32, Ordering};

use crate::parking_lot;

const IS_LOCKED: u32 = 1 << 0;
const MAY_HAVE_WAITING_EXCL: u32 = 1 << 1;
const MAY_HAVE_WAITING_SHARED: u32 = 1 << 2;
const SHARED_COUNT_SHIFT: u32 = 3;

fn shared_count(state: u32) -> u32 {
    state >> SHARED_COUNT_SHIFT
}

std::thread_local! {
    static HELD_SHARED: RefCell<HashMap<usize, u32>> = RefCell::new(HashMap::new());
}

fn recursion_count(addr: usize) -> u32 {
    HELD_SHARED.with(|map| *map.borrow().get(&addr).unwrap_or(&0))
}

fn bump_recursion(addr: usize) {
    HELD_SHARED.with(|map| *map.borrow_mut().entry(addr).or_insert(0) += 1);
}

fn drop_recursion(addr: usize) {
    HELD_SHARED.with(|map| {
        let mut map = map.borrow_mut();
        if let Some(count) = map.get_mut(&addr) {
            *count -= 1;
            if *count == 0 {
                map.remove(&addr);
            }
        }
    });
}

/// A reader-writer lock whose read side is safe to re-enter from the
/// thread already holding it.
pub struct SharedRecursiveMutex<T: ?Sized> {
    state: AtomicU32,
    data: UnsafeCell<T>,
}

// SAFETY: see `SharedMutex`; the recursion bookkeeping only changes which
// thread is allowed to skip the writer-preference wait, not who may touch
// `data` concurrently.
unsafe impl<T: ?Sized + Send> Send for SharedRecursiveMutex<T> {}
// SAFETY: see above.
unsafe impl<T: ?Sized + Send + Sync> Sync for SharedRecursiveMutex<T> {}

impl<T> SharedRecursiveMutex<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        SharedRecursiveMutex {
            state: AtomicU32::new(0),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SharedRecursiveMutex<T> {
    fn addr(&self) -> usize {
        (self as *const Self).cast::<()>() as usize
    }

    fn exclusive_wait_address(&self) -> usize {
        self.addr()
    }

    fn shared_wait_address(&self) -> usize {
        self.addr().wrapping_add(1)
    }

    pub fn read(&self) -> SharedRecursiveMutexReadGuard<'_, T> {
        let addr = self.addr();

        if recursion_count(addr) > 0 {
            self.state.fetch_add(1 << SHARED_COUNT_SHIFT, Ordering::Acquire);
            bump_recursion(addr);
            return SharedRecursiveMutexReadGuard { mutex: self };
        }

        loop {
            let current = self.state.load(Ordering::Relaxed);
            if current & (IS_LOCKED | MAY_HAVE_WAITING_EXCL) == 0 {
                if self
                    .state
                    .compare_exchange_weak(
                        current,
                        current + (1 << SHARED_COUNT_SHIFT),
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    bump_recursion(addr);
                    return SharedRecursiveMutexReadGuard { mutex: self };
                }
                continue;
            }

            self.state.fetch_or(MAY_HAVE_WAITING_SHARED, Ordering::Relaxed);
            parking_lot::global().wait(
                self.shared_wait_address(),
                || self.state.load(Ordering::Relaxed) & (IS_LOCKED | MAY_HAVE_WAITING_EXCL) != 0,
                || {},
            );
        }
    }

    fn unlock_read(&self) {
        let addr = self.addr();
        drop_recursion(addr);
        let previous = self.state.fetch_sub(1 << SHARED_COUNT_SHIFT, Ordering::Release);
        let remaining = shared_count(previous) - 1;
        if remaining == 0 && previous & MAY_HAVE_WAITING_EXCL != 0 {
            parking_lot::global().wake_one(self.exclusive_wait_address(), |_, has_remaining| {
                if !has_remaining {
                    self.state.fetch_and(!MAY_HAVE_WAITING_EXCL, Ordering::Relaxed);
                }
                0
            });
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for SharedRecursiveMutex<T> {
    fn default() -> Self {
        SharedRecursiveMutex::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SharedRecursiveMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load(Ordering::Relaxed);
        f.debug_struct("SharedRecursiveMutex")
            .field("shared_count", &shared_count(state))
            .finish_non_exhaustive()
    }
}

#[must_use = "the read lock is held until this guard is dropped"]
pub struct SharedRecursiveMutexReadGuard<'a, T: ?Sized> {
    mutex: &'a SharedRecursiveMutex<T>,
}

impl<T: ?Sized> Deref for SharedRecursiveMutexReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding a read guard means the shared count is nonzero
        // and no exclusive lock exists concurrently.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for SharedRecursiveMutexReadGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock_read();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_thread_can_read_recursively() {
        let mutex = SharedRecursiveMutex::new(1);
        let outer = mutex.read();
        let inner = mutex.read();
        assert_eq!(*outer, 1);
        assert_eq!(*inner, 1);
    }

    #[test]
    fn recursion_bookkeeping_is_released_on_drop() {
        let mutex = SharedRecursiveMutex::new(());
        {
            let _a = mutex.read();
            let _b = mutex.read();
        }
        assert_eq!(recursion_count(mutex.addr()), 0);
    }
}
