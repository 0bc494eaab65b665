//! A mutex the owning thread may re-lock any number of times.
//!
//! The state doesn't fit [`crate::intrusive_mutex`]'s single-byte template
//! (it needs an owner identity and a recursion count alongside the lock
//! bit), so this implements its own fast path directly against
//! [`crate::parking_lot`].
#![expect(unsafe_code, reason = "guard access to the UnsafeCells is gated by ownership of the lock")]

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::parking_lot;

static NEXT_THREAD_TAG: AtomicU64 = AtomicU64::new(1);

fn thread_tag() -> u64 {
    std::thread_local! {
        static TAG: u64 = NEXT_THREAD_TAG.fetch_add(1, Ordering::Relaxed);
    }
    TAG.with(|tag| *tag)
}

/// A re-entrant mutex: the thread already holding the lock can lock it
/// again without deadlocking, and must unlock it the same number of times.
pub struct RecursiveMutex<T: ?Sized> {
    owner: AtomicU64,
    may_have_waiters: AtomicBool,
    count: UnsafeCell<u32>,
    data: UnsafeCell<T>,
}

// SAFETY: `data` is only reachable through a guard constructed while this
// thread is recorded as `owner`, which at most one thread can be at a time.
unsafe impl<T: ?Sized + Send> Send for RecursiveMutex<T> {}
// SAFETY: see above.
unsafe impl<T: ?Sized + Send> Sync for RecursiveMutex<T> {}

impl<T> RecursiveMutex<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        RecursiveMutex {
            owner: AtomicU64::new(0),
            may_have_waiters: AtomicBool::new(false),
            count: UnsafeCell::new(0),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> RecursiveMutex<T> {
    fn wait_address(&self) -> usize {
        &self.owner as *const AtomicU64 as usize
    }

    pub fn lock(&self) -> RecursiveMutexGuard<'_, T> {
        let tag = thread_tag();

        if self.owner.load(Ordering::Acquire) == tag {
            self.bump_count();
            return RecursiveMutexGuard { mutex: self };
        }

        loop {
            if self
                .owner
                .compare_exchange(0, tag, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: we just became the sole owner.
                unsafe { *self.count.get() = 1 };
                return RecursiveMutexGuard { mutex: self };
            }

            self.may_have_waiters.store(true, Ordering::Relaxed);
            parking_lot::global().wait(
                self.wait_address(),
                || self.owner.load(Ordering::Relaxed) != 0 && self.may_have_waiters.load(Ordering::Relaxed),
                || {},
            );
        }
    }

    fn bump_count(&self) {
        // SAFETY: only the owning thread ever touches `count`.
        let count = unsafe { &mut *self.count.get() };
        *count = count
            .checked_add(1)
            .expect("RecursiveMutex locked more times than a u32 can count");
    }

    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Acquire) != 0
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for RecursiveMutex<T> {
    fn default() -> Self {
        RecursiveMutex::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RecursiveMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecursiveMutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// An RAII guard releasing one level of [`RecursiveMutex`] recursion when
/// dropped.
#[must_use = "the lock is held until this guard is dropped"]
pub struct RecursiveMutexGuard<'a, T: ?Sized> {
    mutex: &'a RecursiveMutex<T>,
}

impl<T: ?Sized> Deref for RecursiveMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the calling thread is recorded as `owner`.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for RecursiveMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Deref`; only the owning thread reaches here, and it
        // is the only thread permitted to mutate `data` or `count`.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for RecursiveMutexGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: only the owning thread touches `count`.
        let count = unsafe { &mut *self.mutex.count.get() };
        *count -= 1;
        if *count != 0 {
            return;
        }

        self.mutex.owner.store(0, Ordering::Release);
        if self.mutex.may_have_waiters.swap(false, Ordering::Relaxed) {
            parking_lot::global().wake_one(self.mutex.wait_address(), |_, _| 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;

    #[test]
    fn same_thread_can_relock() {
        let mutex = RecursiveMutex::new(0);
        let outer = mutex.lock();
        let inner = mutex.lock();
        drop(inner);
        assert!(mutex.is_locked());
        drop(outer);
        assert!(!mutex.is_locked());
    }

    #[test]
    fn contended_across_threads_is_serialized() {
        let mutex = Arc::new(RecursiveMutex::new(0u64));
        let (tx, rx) = mpsc::channel();

        for _ in 0..8 {
            let mutex = mutex.clone();
            let tx = tx.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let mut outer = mutex.lock();
                    {
                        let mut inner = mutex.lock();
                        *inner += 1;
                    }
                    *outer += 1;
                }
                tx.send(()).unwrap();
            });
        }
        drop(tx);
        for _ in 0..8 {
            rx.recv().unwrap();
        }
        assert_eq!(*mutex.lock(), 8000);
    }
}
