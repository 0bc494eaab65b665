//! The engine's concurrency runtime: a multi-priority work-stealing task
//! scheduler, a futex-style parking lot, and a family of mutex primitives
//! built on top of [`nova_os`].
//!
//! Unlike `nova_os`, this crate requires `std` outright — the scheduler
//! owns real OS threads (`std::thread`) and there is no meaningful
//! no-threads fallback for a task-graph runtime.
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod event;
pub mod external_mutex;
pub mod intrusive_mutex;
pub mod local_queue;
pub mod mutex;
pub mod parking_lot;
pub mod recursive_mutex;
pub mod scheduler;
pub mod shared_mutex;
pub mod shared_recursive_mutex;
pub mod task;
pub mod thread_state;
pub mod waiting_queue;
pub mod word_mutex;

pub use config::RuntimeConfig;
pub use event::ManualResetEvent;
pub use external_mutex::ExternalMutex;
pub use mutex::{Mutex, MutexGuard};
pub use parking_lot::ParkingLot;
pub use recursive_mutex::{RecursiveMutex, RecursiveMutexGuard};
pub use scheduler::{QueuePreference, Scheduler};
pub use shared_mutex::{SharedMutex, SharedMutexReadGuard, SharedMutexWriteGuard};
pub use shared_recursive_mutex::SharedRecursiveMutex;
pub use task::{CancelFlags, LowLevelTask, Priority, TaskFlags, TaskHandle, TaskPriority};
pub use thread_state::WorkerState;
pub use word_mutex::WordMutex;
