//! The lock-free and spin-based building blocks `nova_task`'s scheduler is
//! assembled from.
//!
//! ## Primitives
//!
//! - [`Futex`] : the bare `AtomicBool` lock bit [`SpinLock`] is built on.
//! - [`SpinLock`] : guards each worker's per-priority [`ArrayDeque`] local
//!   queue, where critical sections are short enough that busy-waiting beats
//!   parking.
//!
//! ## Concurrent Queues
//!
//! - [`ListQueue`] : the unbounded overflow lane each priority falls back to
//!   once a worker's local queue is full, shared across all workers.
//! - [`ArrayDeque`] : the fixed-capacity ring buffer backing each worker's
//!   own local queue.
//! - [`XorShift64Star`] : randomizes which victim a work-stealing worker
//!   probes first.

// -----------------------------------------------------------------------------
// Modules

mod array_deque;
mod backoff;
mod cache_paded;
mod futex;
mod list_queue;
mod spin_lock;
mod xor_shift;

// -----------------------------------------------------------------------------
// Exports

pub use array_deque::ArrayDeque;
pub use backoff::Backoff;
pub use cache_paded::CachePadded;
pub use futex::Futex;
pub use list_queue::ListQueue;
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use xor_shift::XorShift64Star;

// -----------------------------------------------------------------------------
// Utils for test
