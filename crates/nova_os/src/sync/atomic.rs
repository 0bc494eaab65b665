//! The atomic widths the scheduler actually builds on: task flags and
//! cancellation bits (`AtomicU8`), generation/epoch counters and lock words
//! (`AtomicU32`/`AtomicU64`), intrusive-list links (`AtomicPtr`), running
//! flags and indices (`AtomicBool`/`AtomicUsize`).
//!
//! Falls back to `portable_atomic` on targets missing a given width natively.
//! Signed and 16-bit atomics aren't re-exported here since nothing in this
//! workspace's lock-free structures needs them — see the [standard library]
//! for the full surface if a future primitive does.
//!
//! [standard library]: https://doc.rust-lang.org/core/sync/atomic

pub use atomic_8::{AtomicBool, AtomicU8};
pub use atomic_32::AtomicU32;
pub use atomic_64::AtomicU64;
pub use core::sync::atomic::{AtomicPtr, AtomicUsize};
pub use core::sync::atomic::{Ordering, compiler_fence, fence};

#[cfg(target_has_atomic = "8")]
use core::sync::atomic as atomic_8;

#[cfg(not(target_has_atomic = "8"))]
use portable_atomic as atomic_8;

#[cfg(target_has_atomic = "32")]
use core::sync::atomic as atomic_32;

#[cfg(not(target_has_atomic = "32"))]
use portable_atomic as atomic_32;

#[cfg(target_has_atomic = "64")]
use core::sync::atomic as atomic_64;

#[cfg(not(target_has_atomic = "64"))]
use portable_atomic as atomic_64;

#[cfg(not(target_has_atomic = "ptr"))]
compile_error!("Platforms without atomic pointers are currently not supported.");
