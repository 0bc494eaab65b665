//! The engine's concurrency runtime: a work-stealing task scheduler, a
//! futex-style parking lot, and a family of mutex primitives, layered on
//! top of the platform primitives in [`os`].
#![cfg_attr(docsrs, feature(doc_cfg))]
#![no_std]

pub use nova_os as os;
pub use nova_task as task;
