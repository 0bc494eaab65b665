//! Exponential backoff for the scheduler's CAS retry loops.
//!
//! Every lock-free structure in this workspace — the mutex state words in
//! `nova_task`'s `intrusive_mutex` and `word_mutex`, and the continuation-claim
//! race in `task.rs` — retries a `compare_exchange` in a plain spin loop.
//! Without backoff, a CAS retry storm under contention spends most of its
//! time on bus traffic rather than forward progress; this widens the gap
//! between attempts (first by spinning longer, then by yielding to the OS
//! scheduler) so a thread losing the race backs off instead of hammering
//! the same cache line.

use core::cell::Cell;
use core::fmt;

/// The maximum exponent of spin count, after which [`Backoff::snooze`]
/// stops growing the spin and yields the timeslice instead.
const SPIN_LIMIT: u32 = 5;

/// Tracks how many times a caller has retried, so consecutive calls to
/// [`spin`](Backoff::spin)/[`snooze`](Backoff::snooze) back off further each
/// time. Cheap enough to build fresh at the top of every retry loop.
pub struct Backoff {
    step: Cell<u32>,
}

impl Backoff {
    /// Creates a new `Backoff`.
    #[inline(always)]
    pub const fn new() -> Self {
        Self { step: Cell::new(0) }
    }

    /// Backs off in a lock-free loop.
    ///
    /// This method should be used when we need to retry an operation because another thread made
    /// progress.
    ///
    /// The processor may yield using the *YIELD* or *PAUSE* instruction.
    #[inline(always)]
    pub fn spin(&self) {
        let step: u32 = 1 << self.step.get();
        for _ in 0..step {
            core::hint::spin_loop();
        }

        if self.step.get() < SPIN_LIMIT {
            self.step.set(self.step.get() + 1);
        }
    }

    /// Backs off in a blocking loop.
    ///
    /// This method should be used when we need to wait for another thread to make progress.
    ///
    /// The processor may yield using the *YIELD* or *PAUSE* instruction and the current thread
    /// may yield by giving up a timeslice to the OS scheduler.
    ///
    /// In `#[no_std]` environments, this method is equivalent to [`spin`].
    ///
    /// [`spin`]: Backoff::spin
    #[inline]
    pub fn snooze(&self) {
        if self.step.get() < SPIN_LIMIT {
            let step: u32 = 1 << { self.step.get() << 1 };

            for _ in 0..step {
                core::hint::spin_loop();
            }

            self.step.set(self.step.get() + 1);
        } else {
            #[cfg(not(feature = "std"))]
            for _ in 0..1024_u32 {
                core::hint::spin_loop();
            }

            #[cfg(feature = "std")]
            ::std::thread::yield_now();
        }
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backoff").field("step", &self.step).finish()
    }
}

impl Default for Backoff {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}
