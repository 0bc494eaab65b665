//! A writer-preference reader-writer lock: once a writer is waiting, new
//! readers queue behind it rather than continuing to starve it.
//!
//! Packs `[shared-count(29) | may-have-waiting-shared | may-have-waiting-
//! exclusive | is-locked]` into one `AtomicU32`, the shape the distilled
//! spec calls for — but the two wait addresses it parks readers and writers
//! on are synthesized from `self`'s address rather than pointing at two
//! real sub-fields, since nothing else needs to read through them.
#![expect(unsafe_code, reason = "guard access to the UnsafeCell is gated by the reader/writer state")]

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};

use nova_os::sync::atomic::{AtomicU32, Ordering};

use crate::parking_lot;

const IS_LOCKED: u32 = 1 << 0;
const MAY_HAVE_WAITING_EXCL: u32 = 1 << 1;
const MAY_HAVE_WAITING_SHARED: u32 = 1 << 2;
const SHARED_COUNT_SHIFT: u32 = 3;
const SHARED_COUNT_MAX: u32 = (1 << (32 - SHARED_COUNT_SHIFT)) - 1;

fn shared_count(state: u32) -> u32 {
    state >> SHARED_COUNT_SHIFT
}

/// A reader-writer lock with writer preference.
pub struct SharedMutex<T: ?Sized> {
    state: AtomicU32,
    data: UnsafeCell<T>,
}

// SAFETY: `data` is reachable either through one read guard at a time
// sharing the count, or through one write guard holding `IS_LOCKED`
// exclusively; the state word's CAS protocol enforces that invariant.
unsafe impl<T: ?Sized + Send> Send for SharedMutex<T> {}
// SAFETY: see above; `T: Sync` is additionally required to hand out
// multiple concurrent `&T` through read guards.
unsafe impl<T: ?Sized + Send + Sync> Sync for SharedMutex<T> {}

impl<T> SharedMutex<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        SharedMutex {
            state: AtomicU32::new(0),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SharedMutex<T> {
    fn exclusive_wait_address(&self) -> usize {
        (self as *const Self).cast::<()>() as usize
    }

    fn shared_wait_address(&self) -> usize {
        ((self as *const Self).cast::<()>() as usize).wrapping_add(1)
    }

    pub fn read(&self) -> SharedMutexReadGuard<'_, T> {
        loop {
            let current = self.state.load(Ordering::Relaxed);
            if current & (IS_LOCKED | MAY_HAVE_WAITING_EXCL) == 0 {
                debug_assert!(shared_count(current) < SHARED_COUNT_MAX, "shared reader count overflow");
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
                    return SharedMutexReadGuard { mutex: self };
                }
                continue;
            }

            self.state.fetch_or(MAY_HAVE_WAITING_SHARED, Ordering::Relaxed);
            parking_lot::global().wait(
                self.shared_wait_address(),
                || {
                    let current = self.state.load(Ordering::Relaxed);
                    current & (IS_LOCKED | MAY_HAVE_WAITING_EXCL) != 0
                },
                || {},
            );
        }
    }

    pub fn write(&self) -> SharedMutexWriteGuard<'_, T> {
        loop {
            let current = self.state.load(Ordering::Relaxed);
            if current & IS_LOCKED == 0 && shared_count(current) == 0 {
                if self
                    .state
                    .compare_exchange_weak(current, current | IS_LOCKED, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return SharedMutexWriteGuard { mutex: self };
                }
                continue;
            }

            self.state.fetch_or(MAY_HAVE_WAITING_EXCL, Ordering::Relaxed);
            parking_lot::global().wait(
                self.exclusive_wait_address(),
                || {
                    let current = self.state.load(Ordering::Relaxed);
                    current & IS_LOCKED != 0 || shared_count(current) != 0
                },
                || {},
            );
        }
    }

    fn unlock_read(&self) {
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

    fn unlock_write(&self) {
        let previous = self.state.fetch_and(!IS_LOCKED, Ordering::Release);
        if previous & MAY_HAVE_WAITING_EXCL != 0 {
            let woke = parking_lot::global().wake_one(self.exclusive_wait_address(), |did_wake, has_remaining| {
                if did_wake && !has_remaining {
                    self.state.fetch_and(!MAY_HAVE_WAITING_EXCL, Ordering::Relaxed);
                }
                0
            });
            if woke.did_wake {
                return;
            }
            self.state.fetch_and(!MAY_HAVE_WAITING_EXCL, Ordering::Relaxed);
        }
        if previous & MAY_HAVE_WAITING_SHARED != 0 {
            self.state.fetch_and(!MAY_HAVE_WAITING_SHARED, Ordering::Relaxed);
            parking_lot::global().wake_all(self.shared_wait_address());
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for SharedMutex<T> {
    fn default() -> Self {
        SharedMutex::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SharedMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load(Ordering::Relaxed);
        f.debug_struct("SharedMutex")
            .field("locked_exclusive", &(state & IS_LOCKED != 0))
            .field("shared_count", &shared_count(state))
            .finish_non_exhaustive()
    }
}

#[must_use = "the read lock is held until this guard is dropped"]
pub struct SharedMutexReadGuard<'a, T: ?Sized> {
    mutex: &'a SharedMutex<T>,
}

impl<T: ?Sized> Deref for SharedMutexReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding a read guard means the shared count is nonzero
        // and no write guard exists concurrently.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for SharedMutexReadGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock_read();
    }
}

#[must_use = "the write lock is held until this guard is dropped"]
pub struct SharedMutexWriteGuard<'a, T: ?Sized> {
    mutex: &'a SharedMutex<T>,
}

impl<T: ?Sized> Deref for SharedMutexWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding a write guard means `IS_LOCKED` is set by us and
        // no other guard of either kind exists.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SharedMutexWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Deref`.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for SharedMutexWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering as O};

    #[test]
    fn multiple_readers_see_each_other() {
        let mutex = SharedMutex::new(7);
        let a = mutex.read();
        let b = mutex.read();
        assert_eq!(*a, 7);
        assert_eq!(*b, 7);
    }

    #[test]
    fn writer_excludes_readers() {
        let mutex = Arc::new(SharedMutex::new(0u64));
        {
            let mut guard = mutex.write();
            *guard = 42;
        }
        assert_eq!(*mutex.read(), 42);
    }

    #[test]
    fn concurrent_readers_and_writers_stay_consistent() {
        let mutex = Arc::new(SharedMutex::new(0u64));
        let readers_ok = Arc::new(AtomicUsize::new(0));

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let mutex = mutex.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        *mutex.write() += 1;
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let mutex = mutex.clone();
                let readers_ok = readers_ok.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let _ = *mutex.read();
                        readers_ok.fetch_add(1, O::Relaxed);
                    }
                })
            })
            .collect();

        for h in writers {
            h.join().unwrap();
        }
        for h in readers {
            h.join().unwrap();
        }

        assert_eq!(*mutex.read(), 800);
        assert_eq!(readers_ok.load(O::Relaxed), 800);
    }
}
