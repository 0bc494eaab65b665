//! A pointer-sized mutex with its own intrusive wait queue, living entirely
//! in callers' stack frames. Used internally by [`crate::parking_lot`]'s
//! buckets, which can't depend on the parking lot without becoming
//! circular.
#![expect(unsafe_code, reason = "intrusive queue nodes are linked via raw pointers")]

use core::ptr;

use nova_os::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use nova_os::utils::Backoff;

use crate::event::ManualResetEvent;

struct QueueNode {
    prev: AtomicPtr<QueueNode>,
    next: AtomicPtr<QueueNode>,
    event: ManualResetEvent,
}

impl QueueNode {
    fn new() -> Self {
        QueueNode {
            prev: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(ptr::null_mut()),
            event: ManualResetEvent::new(),
        }
    }
}

/// A mutex whose slow path queues waiters via pointers to nodes allocated
/// on each waiter's own stack frame, rather than through a shared wait
/// structure. Never recursive; not fair (the fast-path CAS in [`lock`] may
/// win over a queued waiter).
pub struct WordMutex {
    locked: AtomicBool,
    queue_lock: AtomicBool,
    tail: AtomicPtr<QueueNode>,
    head: AtomicPtr<QueueNode>,
}

impl WordMutex {
    #[must_use]
    pub const fn new() -> Self {
        WordMutex {
            locked: AtomicBool::new(false),
            queue_lock: AtomicBool::new(false),
            tail: AtomicPtr::new(ptr::null_mut()),
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn lock(&self) {
        if self.try_lock() {
            return;
        }

        let node = QueueNode::new();
        let node_ptr: *mut QueueNode = &node as *const QueueNode as *mut QueueNode;

        let backoff = Backoff::new();
        for _ in 0..40 {
            if self.tail.load(Ordering::Acquire).is_null() && self.try_lock() {
                return;
            }
            backoff.spin();
        }

        let prev = self.tail.swap(node_ptr, Ordering::AcqRel);
        node.prev.store(prev, Ordering::Release);
        if prev.is_null() {
            self.head.store(node_ptr, Ordering::Release);
        } else {
            // SAFETY: `prev` was the tail of a non-empty queue; its owner is
            // blocked on `prev.event` until dequeued, so `prev` stays alive.
            unsafe { (*prev).next.store(node_ptr, Ordering::Release) };
        }

        node.event.wait();
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);

        if self.tail.load(Ordering::Acquire).is_null() {
            return;
        }
        if self.queue_lock.swap(true, Ordering::AcqRel) {
            // Another unlock (or the head's own removal) is already
            // draining the queue.
            return;
        }

        let head = self.head.load(Ordering::Acquire);
        if head.is_null() {
            self.queue_lock.store(false, Ordering::Release);
            return;
        }

        // Fill in the `next` link from `tail` back to `head` in case it
        // hasn't been discovered by an enqueue yet.
        let mut current = self.tail.load(Ordering::Acquire);
        while current != head {
            // SAFETY: every node on the chain from `tail` to `head` is kept
            // alive by its owner blocking on `event`.
            let prev = unsafe { (*current).prev.load(Ordering::Acquire) };
            unsafe { (*prev).next.store(current, Ordering::Release) };
            current = prev;
        }

        // SAFETY: `head` is alive; its owner is blocked on `head.event`.
        let mut new_head = unsafe { (*head).next.load(Ordering::Acquire) };
        if new_head.is_null() {
            if self
                .tail
                .compare_exchange(head, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // A concurrent `lock()` swapped itself onto the tail but
                // hasn't published its `next` link yet; spin briefly for it
                // (bounded: the enqueuing thread publishes within a few
                // instructions of the swap).
                loop {
                    new_head = unsafe { (*head).next.load(Ordering::Acquire) };
                    if !new_head.is_null() {
                        break;
                    }
                    core::hint::spin_loop();
                }
                self.head.store(new_head, Ordering::Release);
            } else {
                self.head.store(ptr::null_mut(), Ordering::Release);
            }
        } else {
            self.head.store(new_head, Ordering::Release);
        }

        self.queue_lock.store(false, Ordering::Release);
        // SAFETY: `head` remains valid until its `event` is signaled, which
        // we are about to do; the owning stack frame only pops once woken.
        unsafe { (*head).event.notify() };
    }
}

impl Default for WordMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for WordMutex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WordMutex")
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;

    #[test]
    fn smoke() {
        let mutex = WordMutex::new();
        assert!(!mutex.is_locked());
        mutex.lock();
        assert!(mutex.is_locked());
        mutex.unlock();
        assert!(!mutex.is_locked());
    }

    #[test]
    fn contended_increments_are_serialized() {
        let mutex = Arc::new(WordMutex::new());
        let counter = Arc::new(core::sync::atomic::AtomicU64::new(0));
        let (tx, rx) = mpsc::channel();

        for _ in 0..8 {
            let mutex = mutex.clone();
            let counter = counter.clone();
            let tx = tx.clone();
            std::thread::spawn(move || {
                for _ in 0..2000 {
                    mutex.lock();
                    counter.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
                    mutex.unlock();
                }
                tx.send(()).unwrap();
            });
        }
        drop(tx);
        for _ in 0..8 {
            rx.recv().unwrap();
        }
        assert_eq!(counter.load(core::sync::atomic::Ordering::Relaxed), 16000);
    }
}
