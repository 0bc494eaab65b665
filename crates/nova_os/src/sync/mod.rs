//! Synchronization primitives re-exported from the standard library.
//!
//! This crate targets native platforms with real OS threads only, so this
//! module is a thin, zero-overhead pass-through rather than a portability
//! shim; the engine's own lock-free and spin-based primitives live in
//! [`crate::utils`] instead.
//!
//! See the [standard library] for further details.
//!
//! [standard library]: https://doc.rust-lang.org/std/sync/index.html

// -----------------------------------------------------------------------------
// Modules

pub mod atomic;

// -----------------------------------------------------------------------------
// Exports

pub use alloc::sync::{Arc, Weak};

#[cfg(feature = "std")]
pub use std::sync::{
    Barrier, BarrierWaitResult, Condvar, LazyLock, LockResult, Mutex, MutexGuard, Once, OnceLock,
    OnceState, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError,
    TryLockResult, WaitTimeoutResult, mpsc,
};
