//! Adapts [`crate::intrusive_mutex`]'s algorithm to a lock bit living inside
//! a caller-owned `AtomicU8`, for callers that need to fold a lock flag
//! into a word they already have other state packed into (so they can't
//! hand that byte over for a [`crate::mutex::Mutex`] to own outright).

use core::fmt;

use nova_os::sync::atomic::AtomicU8;

use crate::intrusive_mutex::{self, LockBits};
use crate::parking_lot;

/// A mutex over bits borrowed from someone else's `AtomicU8`.
///
/// `bits` selects which two bits of `*word` mean "locked" and "a thread is
/// parked waiting for this lock"; the remaining six bits are the caller's
/// to read and write freely whenever the lock bit is clear, and must not be
/// touched by anyone else while it's set.
pub struct ExternalMutex<'a> {
    word: &'a AtomicU8,
    bits: LockBits,
}

impl<'a> ExternalMutex<'a> {
    #[must_use]
    pub fn new(word: &'a AtomicU8, bits: LockBits) -> Self {
        ExternalMutex { word, bits }
    }

    fn wait_address(&self) -> usize {
        self.word as *const AtomicU8 as usize
    }

    pub fn lock(&self) -> ExternalMutexGuard<'_> {
        intrusive_mutex::lock(self.word, self.bits, parking_lot::global(), self.wait_address());
        ExternalMutexGuard { mutex: self }
    }

    pub fn try_lock(&self) -> Option<ExternalMutexGuard<'_>> {
        if intrusive_mutex::try_lock(self.word, self.bits) {
            Some(ExternalMutexGuard { mutex: self })
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        intrusive_mutex::is_locked(self.word, self.bits)
    }
}

impl fmt::Debug for ExternalMutex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalMutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// An RAII guard releasing an [`ExternalMutex`]'s lock bit when dropped.
/// Carries no data — the caller already knows how to reach whatever the
/// lock bit protects.
#[must_use = "the lock is held until this guard is dropped"]
pub struct ExternalMutexGuard<'a> {
    mutex: &'a ExternalMutex<'a>,
}

impl Drop for ExternalMutexGuard<'_> {
    fn drop(&mut self) {
        intrusive_mutex::unlock(self.mutex.word, self.mutex.bits, parking_lot::global(), self.mutex.wait_address());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;

    const BITS: LockBits = LockBits { locked_bit: 1 << 4, waiting_bit: 1 << 5 };

    #[test]
    fn lock_leaves_other_bits_untouched() {
        let word = AtomicU8::new(0b0000_0011);
        let mutex = ExternalMutex::new(&word, BITS);
        {
            let _guard = mutex.lock();
            assert_eq!(word.load(core::sync::atomic::Ordering::Relaxed) & 0b0000_0011, 0b0000_0011);
        }
        assert!(!mutex.is_locked());
    }

    #[test]
    fn contended_lock_serializes() {
        let word = Arc::new(AtomicU8::new(0));
        let counter = Arc::new(core::sync::atomic::AtomicU64::new(0));
        let (tx, rx) = mpsc::channel();

        for _ in 0..4 {
            let word = word.clone();
            let counter = counter.clone();
            let tx = tx.clone();
            std::thread::spawn(move || {
                let mutex = ExternalMutex::new(&word, BITS);
                for _ in 0..500 {
                    let _guard = mutex.lock();
                    counter.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
                }
                tx.send(()).unwrap();
            });
        }
        drop(tx);
        for _ in 0..4 {
            rx.recv().unwrap();
        }
        assert_eq!(counter.load(core::sync::atomic::Ordering::Relaxed), 2000);
    }
}
