//! Per-thread scheduler state and the global registry the scheduler walks
//! to find it (distilled spec §4.14).
//!
//! Every thread that ever calls into this crate — worker or not — lazily
//! gets one [`WorkerState`], registered (as a [`Weak`]) in a single global
//! list. The registry is a plain mutex-protected `Vec` rather than the
//! intrusive list plus MPMC insert/delete fallback queues the distilled
//! spec describes: the fallback exists there so a thread can still publish
//! its record when the list mutex is contended *during a crash*, on an
//! allocator that may not be ready yet. Neither condition applies here —
//! `std`'s global allocator is always available, and there is no
//! signal-handler-safety concern — so a mutex alone, per distilled spec
//! §9's explicit "ordinary mutex-protected structure" alternative, covers
//! it.

use nova_os::sync::atomic::{AtomicBool, Ordering};
use nova_os::sync::{Arc, Mutex, OnceLock, Weak};

/// One thread's scheduler-visible state. Currently just the flag
/// [`has_pending_wake_up`](Scheduler's shutdown query) reads; a thread
/// holds this for its entire lifetime once it's first touched.
pub struct WorkerState {
    /// Set for the duration of [`crate::scheduler::Scheduler::try_launch`]
    /// on this thread — the window shutdown needs to know about, since a
    /// task pushed but not yet visible to any worker's queue can't be
    /// accounted for any other way.
    pending_wake: AtomicBool,
}

impl WorkerState {
    fn new() -> Arc<WorkerState> {
        Arc::new(WorkerState {
            pending_wake: AtomicBool::new(false),
        })
    }

    /// Marks this thread as in the middle of publishing a wakeup (a task
    /// launch). Paired with [`clear_pending_wake`](Self::clear_pending_wake).
    pub fn mark_pending_wake(&self) {
        self.pending_wake.store(true, Ordering::Release);
    }

    pub fn clear_pending_wake(&self) {
        self.pending_wake.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn has_pending_wake(&self) -> bool {
        self.pending_wake.load(Ordering::Acquire)
    }
}

fn registry() -> &'static Mutex<Vec<Weak<WorkerState>>> {
    static REGISTRY: OnceLock<Mutex<Vec<Weak<WorkerState>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

std::thread_local! {
    static CURRENT: Arc<WorkerState> = {
        let state = WorkerState::new();
        registry().lock().unwrap_or_else(|e| e.into_inner()).push(Arc::downgrade(&state));
        state
    };
}

/// Returns the calling thread's [`WorkerState`], creating and registering
/// it on first use.
#[must_use]
pub fn current() -> Arc<WorkerState> {
    CURRENT.with(Arc::clone)
}

/// Implements the distilled spec's `HasPendingWakeUp`: true if any
/// currently-live thread (worker or not) is inside the
/// [`mark_pending_wake`](WorkerState::mark_pending_wake)/
/// [`clear_pending_wake`](WorkerState::clear_pending_wake) window. Prunes
/// registry entries for threads that have since exited.
#[must_use]
pub fn has_pending_wake_up() -> bool {
    let mut states = registry().lock().unwrap_or_else(|e| e.into_inner());
    let mut pending = false;
    states.retain(|weak| match weak.upgrade() {
        Some(state) => {
            pending |= state.has_pending_wake();
            true
        }
        None => false,
    });
    pending
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_thread_has_no_pending_wake() {
        std::thread::spawn(|| {
            assert!(!current().has_pending_wake());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn mark_and_clear_round_trip() {
        let state = current();
        assert!(!state.has_pending_wake());
        state.mark_pending_wake();
        assert!(state.has_pending_wake());
        state.clear_pending_wake();
        assert!(!state.has_pending_wake());
    }

    #[test]
    fn registry_observes_other_threads_pending_wake() {
        let (tx, rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let handle = std::thread::spawn(move || {
            let state = current();
            state.mark_pending_wake();
            tx.send(()).unwrap();
            done_rx.recv().unwrap();
            state.clear_pending_wake();
        });
        rx.recv().unwrap();
        assert!(has_pending_wake_up());
        done_tx.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn registry_prunes_exited_threads() {
        let before = has_pending_wake_up();
        let _ = before;
        std::thread::spawn(|| {
            current().mark_pending_wake();
            // Deliberately never cleared — the thread just exits, and its
            // Weak should stop counting once it's gone.
        })
        .join()
        .unwrap();
        assert!(!has_pending_wake_up());
    }
}
