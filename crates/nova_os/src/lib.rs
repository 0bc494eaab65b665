//! Platform primitives shared by the rest of the engine: atomics, spin
//! locks, lock-free queues and thin wrappers around OS threading.
//!
//! Everything here assumes a native target with real OS threads; there is
//! no wasm or bare-metal fallback path (the task scheduler built on top
//! has no meaningful story on platforms without threads anyway).
#![cfg_attr(docsrs, feature(doc_cfg))]
#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod sync;
pub mod thread;
pub mod time;
pub mod utils;
