//! The shared exclusive-lock algorithm behind [`crate::mutex`] (which owns
//! its state byte) and [`crate::external_mutex`] (which borrows a caller's).
//!
//! Exactly two bits of an `AtomicU8` are meaningful: `locked_bit` and
//! `waiting_bit`. Everything else in the byte is the caller's business —
//! [`crate::external_mutex`] uses this to fold a lock flag into a word the
//! caller also uses for other state.
//!
//! [`crate::recursive_mutex`] and [`crate::shared_mutex`] have shapes this
//! template doesn't fit (an owner thread id, a reader count) and implement
//! their own state machines directly against [`crate::parking_lot`] instead
//! of going through here — see `DESIGN.md`.

use nova_os::sync::atomic::{AtomicU8, Ordering};
use nova_os::utils::Backoff;

use crate::parking_lot::ParkingLot;

/// How many fast-path spins to try before parking, when the lock is briefly
/// held by another thread on another core.
const DEFAULT_SPIN_LIMIT: u32 = 40;

/// Parameterizes [`lock`]/[`unlock`] over which bits of a shared `AtomicU8`
/// mean "locked" and "a thread is parked waiting for this lock".
#[derive(Debug, Clone, Copy)]
pub struct LockBits {
    pub locked_bit: u8,
    pub waiting_bit: u8,
}

/// Attempts the fast-path CAS, returning whether it succeeded.
pub fn try_lock(word: &AtomicU8, bits: LockBits) -> bool {
    let mut current = word.load(Ordering::Relaxed);
    loop {
        if current & bits.locked_bit != 0 {
            return false;
        }
        match word.compare_exchange_weak(
            current,
            current | bits.locked_bit,
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
}

#[must_use]
pub fn is_locked(word: &AtomicU8, bits: LockBits) -> bool {
    word.load(Ordering::Acquire) & bits.locked_bit != 0
}

/// Blocks until `bits.locked_bit` can be claimed in `word`.
///
/// Slow path: spin while the waiting flag is clear, then mark it, then park
/// on `wait_address` until woken, looping back to the fast-path attempt.
pub fn lock(word: &AtomicU8, bits: LockBits, parking_lot: &ParkingLot, wait_address: usize) {
    if try_lock(word, bits) {
        return;
    }

    loop {
        let backoff = Backoff::new();
        let mut spun = 0;
        while spun < DEFAULT_SPIN_LIMIT {
            if try_lock(word, bits) {
                return;
            }
            if word.load(Ordering::Relaxed) & bits.waiting_bit != 0 {
                break;
            }
            backoff.spin();
            spun += 1;
        }

        word.fetch_or(bits.waiting_bit, Ordering::Relaxed);

        let state = parking_lot.wait(
            wait_address,
            || word.load(Ordering::Relaxed) & (bits.locked_bit | bits.waiting_bit) == (bits.locked_bit | bits.waiting_bit),
            || {},
        );
        let _ = state;

        if try_lock(word, bits) {
            return;
        }
    }
}

/// Releases `bits.locked_bit` and wakes one waiter if the waiting flag was
/// set, letting the waker clear it if no waiters remain.
pub fn unlock(word: &AtomicU8, bits: LockBits, parking_lot: &ParkingLot, wait_address: usize) {
    let previous = word.fetch_and(!bits.locked_bit, Ordering::Release);
    if previous & bits.waiting_bit == 0 {
        return;
    }

    parking_lot.wake_one(wait_address, |_did_wake, has_remaining| {
        if !has_remaining {
            word.fetch_and(!bits.waiting_bit, Ordering::Relaxed);
        }
        0
    });
}
