//! Coordinates workers going idle and waking back up, and drives dynamic
//! worker creation under oversubscription.
//!
//! The distilled spec describes this as a single packed word (an epoch, a
//! pending-signal count, a pre-wait flag, and a stack of idle thread ids).
//! This instead keeps the same protocol — `prepare_wait` / `commit_wait` /
//! `cancel_wait`, and a notify that never loses a wakeup racing a
//! `prepare_wait` — behind a plain mutex-protected `VecDeque`, per
//! distilled spec §9's explicit option to trade the packed-word design for
//! an ordinary locked structure.

use std::collections::VecDeque;

use nova_os::sync::atomic::{AtomicUsize, Ordering};
use nova_os::sync::Mutex;
use nova_os::time::Instant;

use crate::event::ManualResetEvent;

struct Inner {
    idle: VecDeque<usize>,
    /// `notify` calls that found no idle worker to wake are banked here so
    /// the next `prepare_wait` on any worker consumes one instead of
    /// blocking — this is what makes `notify` before `prepare_wait` safe.
    pending_wakeups: usize,
}

/// One event per worker slot (including not-yet-created standby slots),
/// plus the idle bookkeeping above.
pub struct WaitingQueue {
    inner: Mutex<Inner>,
    events: Vec<ManualResetEvent>,
    standby_created: AtomicUsize,
    standby_active: AtomicUsize,
    standby_limit: usize,
}

/// A handle returned by [`WaitingQueue::prepare_wait`], consumed by either
/// [`WaitingQueue::commit_wait`] or [`WaitingQueue::cancel_wait`].
#[must_use = "call commit_wait or cancel_wait"]
pub struct WaitTicket {
    worker_index: usize,
    consumed_pending_wakeup: bool,
}

impl WaitingQueue {
    #[must_use]
    pub fn new(worker_slots: usize, standby_limit: usize) -> Self {
        WaitingQueue {
            inner: Mutex::new(Inner {
                idle: VecDeque::new(),
                pending_wakeups: 0,
            }),
            events: (0..worker_slots + standby_limit).map(|_| ManualResetEvent::new()).collect(),
            standby_created: AtomicUsize::new(0),
            standby_active: AtomicUsize::new(0),
            standby_limit,
        }
    }

    /// Declares intent to wait: registers `worker_index` as idle, unless a
    /// wakeup that arrived earlier is still banked, in which case it's
    /// consumed immediately and the caller should not block.
    pub fn prepare_wait(&self, worker_index: usize) -> WaitTicket {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.pending_wakeups > 0 {
            inner.pending_wakeups -= 1;
            return WaitTicket {
                worker_index,
                consumed_pending_wakeup: true,
            };
        }
        self.events[worker_index].reset();
        inner.idle.push_back(worker_index);
        WaitTicket {
            worker_index,
            consumed_pending_wakeup: false,
        }
    }

    /// Blocks on the ticket's event. Returns once woken by [`notify`](Self::notify).
    pub fn commit_wait(&self, ticket: WaitTicket) {
        if ticket.consumed_pending_wakeup {
            return;
        }
        self.events[ticket.worker_index].wait();
    }

    /// Like [`commit_wait`](Self::commit_wait) but gives up at `deadline`,
    /// removing the worker from the idle list on timeout.
    pub fn commit_wait_until(&self, ticket: WaitTicket, deadline: Instant) -> bool {
        if ticket.consumed_pending_wakeup {
            return true;
        }
        if self.events[ticket.worker_index].wait_until(deadline) {
            return true;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = inner.idle.iter().position(|&w| w == ticket.worker_index) {
            inner.idle.remove(pos);
            return false;
        }
        // A `notify` raced us and already removed this worker from `idle`;
        // the event will be (or was) signaled regardless.
        true
    }

    /// Cancels a wait prepared but not yet committed (the worker found
    /// work to do on its own in between).
    pub fn cancel_wait(&self, ticket: WaitTicket) {
        if ticket.consumed_pending_wakeup {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = inner.idle.iter().position(|&w| w == ticket.worker_index) {
            inner.idle.remove(pos);
        }
    }

    /// Wakes up to `count` idle workers, banking any unused wakeups for
    /// the next `prepare_wait` calls so no signal is lost to a race.
    pub fn notify(&self, count: usize) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut woken = 0;
        while woken < count {
            match inner.idle.pop_front() {
                Some(worker_index) => {
                    self.events[worker_index].notify();
                    woken += 1;
                }
                None => {
                    inner.pending_wakeups += count - woken;
                    break;
                }
            }
        }
        woken
    }

    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).idle.len()
    }

    /// Reserves the next standby worker slot, for the scheduler's dynamic
    /// thread creation path. Returns `None` once `standby_limit` has been
    /// exhausted (the oversubscription ceiling).
    pub fn prepare_standby(&self) -> Option<usize> {
        let created = self.standby_created.fetch_add(1, Ordering::Relaxed);
        if created >= self.standby_limit {
            self.standby_created.fetch_sub(1, Ordering::Relaxed);
            return None;
        }
        Some(created)
    }

    /// Marks a standby slot reserved by [`prepare_standby`](Self::prepare_standby)
    /// as now backed by a running worker thread.
    pub fn commit_standby(&self, _slot: usize) {
        self.standby_active.fetch_add(1, Ordering::Relaxed);
    }

    /// How many standby slots are backed by an actually-running worker
    /// thread right now, as opposed to merely reserved.
    #[must_use]
    pub fn standby_active(&self) -> usize {
        self.standby_active.load(Ordering::Relaxed)
    }
}
