use core::sync::atomic::{AtomicU64, Ordering};

/// A fast, non-cryptographic pseudo-random number generator intended for
/// picking a randomized starting point when probing a set of queues (work
/// stealing, parking-lot bucket diagnostics, and the like).
///
/// Shared across worker threads (e.g. via a single registry-wide
/// instance), so the state word is an atomic rather than a plain `Cell`.
pub struct XorShift64Star {
    state: AtomicU64,
}

const FIXED_STATE: u64 = 0x9a7013f475bb8c23;

impl XorShift64Star {
    /// A generator with a fixed, reproducible seed. Useful for deterministic tests.
    #[must_use]
    pub const fn fixed() -> Self {
        Self {
            state: AtomicU64::new(FIXED_STATE),
        }
    }

    /// A generator seeded from the current thread and an internal counter, so
    /// distinct instances (e.g. one per worker thread) diverge quickly.
    #[cfg(feature = "std")]
    #[must_use]
    pub fn random_state() -> Self {
        use core::hash::{BuildHasher, Hasher};
        use std::collections::hash_map::RandomState;

        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let mut hasher = RandomState::new().build_hasher();
        hasher.write_u64(COUNTER.fetch_add(1, Ordering::Relaxed));
        let seed = hasher.finish();

        Self {
            state: AtomicU64::new(if seed == 0 { FIXED_STATE } else { seed }),
        }
    }

    /// Returns the next pseudo-random `u64`.
    pub fn next(&self) -> u64 {
        let mut x = self.state.load(Ordering::Relaxed);
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state.store(x, Ordering::Relaxed);
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Returns a pseudo-random value in `0..n`. Returns `0` if `n == 0`.
    pub fn next_usize(&self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        (self.next() % n as u64) as usize
    }
}

#[cfg(feature = "std")]
impl Default for XorShift64Star {
    fn default() -> Self {
        Self::random_state()
    }
}
