//! One-shot, futex-style thread park/wake on a single boolean state.

use nova_os::sync::Mutex;
use nova_os::sync::atomic::{AtomicBool, Ordering};
use nova_os::time::{Duration, Instant};
use std::thread::{self, Thread};

/// A single boolean state that can be waited on and signaled.
///
/// `notify` transitions to signaled and wakes *every* waiter that has
/// already called `wait`/`wait_for`/`wait_until`; `notify` called before
/// any wait is remembered (a `Wait` that starts after `notify` returns
/// immediately). `reset` clears the signal.
///
/// There is no OS futex syscall behind this on any platform here — native
/// Rust already exposes the equivalent primitive as `std::thread::park`/
/// `Thread::unpark`, so the implementation is built on that rather than
/// reaching for raw platform futex calls.
pub struct ManualResetEvent {
    signaled: AtomicBool,
    waiters: Mutex<Vec<Thread>>,
}

impl ManualResetEvent {
    #[must_use]
    pub fn new() -> Self {
        ManualResetEvent {
            signaled: AtomicBool::new(false),
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// An event that starts out already signaled.
    #[must_use]
    pub fn new_signaled() -> Self {
        ManualResetEvent {
            signaled: AtomicBool::new(true),
            waiters: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn poll(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.signaled.store(false, Ordering::Release);
    }

    /// Transitions to signaled and wakes all current waiters.
    pub fn notify(&self) {
        self.signaled.store(true, Ordering::Release);
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        for thread in waiters.drain(..) {
            thread.unpark();
        }
    }

    /// Blocks the calling thread until signaled. Re-checks state after
    /// every spurious wakeup.
    pub fn wait(&self) {
        if self.signaled.load(Ordering::Acquire) {
            return;
        }
        {
            let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
            // Re-check under the lock: `notify` drains the list under the
            // same lock, so if we observe `false` here we're guaranteed to
            // be enqueued before any subsequent drain.
            if self.signaled.load(Ordering::Acquire) {
                return;
            }
            waiters.push(thread::current());
        }
        while !self.signaled.load(Ordering::Acquire) {
            thread::park();
        }
    }

    /// Like [`wait`](Self::wait), but gives up after `duration` and returns
    /// whether the event was observed signaled.
    #[must_use]
    pub fn wait_for(&self, duration: Duration) -> bool {
        self.wait_until(Instant::now() + duration)
    }

    /// Like [`wait`](Self::wait), but gives up at `deadline` and returns
    /// whether the event was observed signaled. An already-past deadline
    /// returns immediately with the current state.
    #[must_use]
    pub fn wait_until(&self, deadline: Instant) -> bool {
        if self.signaled.load(Ordering::Acquire) {
            return true;
        }
        {
            let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
            if self.signaled.load(Ordering::Acquire) {
                return true;
            }
            waiters.push(thread::current());
        }
        loop {
            if self.signaled.load(Ordering::Acquire) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return self.signaled.load(Ordering::Acquire);
            }
            thread::park_timeout(deadline - now);
        }
    }
}

impl Default for ManualResetEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for ManualResetEvent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ManualResetEvent")
            .field("signaled", &self.signaled.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    #[test]
    fn notify_before_wait_is_remembered() {
        let event = ManualResetEvent::new();
        event.notify();
        event.wait();
        assert!(event.poll());
    }

    #[test]
    fn reset_then_notify_leaves_signaled() {
        let event = ManualResetEvent::new();
        event.notify();
        event.reset();
        assert!(!event.poll());
        event.notify();
        assert!(event.poll());
    }

    #[test]
    fn wait_for_times_out_when_unsignaled() {
        let event = ManualResetEvent::new();
        assert!(!event.wait_for(StdDuration::from_millis(10)));
    }

    #[test]
    fn notify_wakes_all_waiters() {
        let event = Arc::new(ManualResetEvent::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let event = event.clone();
                std::thread::spawn(move || event.wait())
            })
            .collect();
        std::thread::sleep(StdDuration::from_millis(20));
        event.notify();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
