//! A plain, non-recursive, non-fair mutex: one byte of state, parking on
//! contention through the process-wide [`ParkingLot`](crate::parking_lot).
#![expect(unsafe_code, reason = "guard access to the UnsafeCell is gated by the locked bit")]

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};

use nova_os::sync::atomic::AtomicU8;

use crate::intrusive_mutex::{self, LockBits};
use crate::parking_lot;

const BITS: LockBits = LockBits {
    locked_bit: 1 << 0,
    waiting_bit: 1 << 1,
};

/// A mutex that panics rather than recurses, and makes no fairness promise:
/// a thread arriving at the fast-path CAS can win the lock ahead of a
/// thread that has been parked waiting for it.
pub struct Mutex<T: ?Sized> {
    state: AtomicU8,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever granted through a `MutexGuard`,
// which is only constructed while `state`'s locked bit is held.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
// SAFETY: see above; `&Mutex<T>` can be shared across threads because the
// locked bit serializes all access to `data`.
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

/// Tag type for [`Mutex::new_locked`]: the mutex starts out locked without
/// the caller having to pay for a redundant CAS to acquire it themselves.
pub struct Locked;

impl<T> Mutex<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Mutex {
            state: AtomicU8::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Constructs the mutex already locked, as if `new(value).lock()` had
    /// just succeeded — the returned guard is the one the caller must drop
    /// to release it. Useful when the owner builds a value "born locked"
    /// (e.g. a handle only meant to be unlocked once fully initialized).
    #[must_use]
    pub const fn new_locked(value: T) -> (Self, Locked) {
        (
            Mutex {
                state: AtomicU8::new(BITS.locked_bit),
                data: UnsafeCell::new(value),
            },
            Locked,
        )
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    fn wait_address(&self) -> usize {
        &self.state as *const AtomicU8 as usize
    }

    /// Releases a lock acquired via [`Mutex::new_locked`], consuming the
    /// `Locked` tag so it can only be done once.
    pub fn unlock_initial(&self, _tag: Locked) {
        intrusive_mutex::unlock(&self.state, BITS, parking_lot::global(), self.wait_address());
    }

    /// Blocks until the lock is acquired, parking on contention through the
    /// process-wide parking lot.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        intrusive_mutex::lock(&self.state, BITS, parking_lot::global(), self.wait_address());
        MutexGuard { mutex: self }
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if intrusive_mutex::try_lock(&self.state, BITS) {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        intrusive_mutex::is_locked(&self.state, BITS)
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Mutex::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// An RAII guard releasing [`Mutex`]'s lock when dropped.
#[must_use = "the lock is held until this guard is dropped"]
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding a `MutexGuard` means the locked bit is set by us.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Deref`; exclusive access follows from holding the lock.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        intrusive_mutex::unlock(&self.mutex.state, BITS, parking_lot::global(), self.mutex.wait_address());
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
