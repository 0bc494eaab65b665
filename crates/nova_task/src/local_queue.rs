//! Per-worker task queues and the global overflow queues backing them.
//!
//! Each priority gets its own fixed-capacity [`ArrayDeque`] per worker,
//! guarded by a [`SpinLock`] since a thief on another thread needs to pop
//! from it too, plus one unbounded [`ListQueue`] shared across all workers
//! for overflow. A worker pushes and pops its own queues from the back
//! (LIFO — the task it just produced is usually the most cache-hot one to
//! run next), while a thief pops from the front (FIFO — it takes the
//! oldest, least cache-hot task, leaving the victim's own hot path alone).
//! This is the owner-LIFO/any-thread-FIFO discipline a Chase-Lev deque
//! gives lock-free; `ArrayDeque` needs the `SpinLock` to make the
//! thief-side access sound, uncontended in the common case where no one is
//! stealing.

use nova_os::sync::Arc;
use nova_os::utils::{ArrayDeque, ListQueue, SpinLock, XorShift64Star};

use crate::task::{TaskHandle, TaskPriority};

/// Per-worker capacity for each priority's local queue.
const LOCAL_QUEUE_CAPACITY: usize = 256;

/// A single worker's set of local queues, one per priority.
pub struct LocalQueue {
    queues: [SpinLock<ArrayDeque<TaskHandle, LOCAL_QUEUE_CAPACITY>>; TaskPriority::COUNT],
}

impl LocalQueue {
    fn new() -> Self {
        LocalQueue {
            queues: core::array::from_fn(|_| SpinLock::new(ArrayDeque::new())),
        }
    }

    /// Pushes onto the calling worker's own queue for `priority`. Returns
    /// the task back on failure (the caller falls back to the overflow
    /// queue).
    pub fn push(&self, priority: TaskPriority, task: TaskHandle) -> Result<(), TaskHandle> {
        self.queues[priority.as_index()].lock().push_back(task)
    }

    /// Pops the calling worker's own highest-priority ready task, LIFO
    /// within a priority.
    pub fn pop(&self) -> Option<TaskHandle> {
        self.queues.iter().find_map(|queue| queue.lock().pop_back())
    }

    /// Pops a task of a specific priority only, used when a worker is
    /// restricted to a priority band (see [`QueuePreference`](crate::scheduler::QueuePreference)).
    pub fn pop_priority(&self, priority: TaskPriority) -> Option<TaskHandle> {
        self.queues[priority.as_index()].lock().pop_back()
    }

    /// Steals this worker's oldest ready task of a specific priority, FIFO,
    /// for another worker's steal attempt.
    fn steal_priority(&self, priority: TaskPriority) -> Option<TaskHandle> {
        self.queues[priority.as_index()].lock().pop_front()
    }

    fn is_empty(&self) -> bool {
        self.queues.iter().all(|queue| queue.lock().is_empty())
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns every worker's [`LocalQueue`] plus the shared overflow queues, and
/// implements work-stealing across them.
pub struct QueueRegistry {
    locals: Vec<Arc<LocalQueue>>,
    overflow: [ListQueue<TaskHandle>; TaskPriority::COUNT],
    rng: XorShift64Star,
}

impl QueueRegistry {
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        QueueRegistry {
            locals: (0..worker_count).map(|_| Arc::new(LocalQueue::new())).collect(),
            overflow: core::array::from_fn(|_| ListQueue::new(64)),
            rng: XorShift64Star::fixed(),
        }
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.locals.len()
    }

    #[must_use]
    pub fn local(&self, worker_index: usize) -> Arc<LocalQueue> {
        self.locals[worker_index].clone()
    }

    /// Pushes to the named worker's local queue, spilling to the shared
    /// overflow queue for that priority if the local queue is full.
    pub fn push_to(&self, worker_index: usize, priority: TaskPriority, task: TaskHandle) {
        if let Err(task) = self.locals[worker_index].push(priority, task) {
            self.overflow[priority.as_index()].push(task);
        }
    }

    /// Pushes directly to the shared overflow queue, used when there is no
    /// natural "home" worker (e.g. launching from a non-worker thread).
    pub fn push_overflow(&self, priority: TaskPriority, task: TaskHandle) {
        self.overflow[priority.as_index()].push(task);
    }

    pub fn pop_overflow(&self, priority: TaskPriority) -> Option<TaskHandle> {
        self.overflow[priority.as_index()].pop()
    }

    /// Picks a random worker other than `exclude` and steals its oldest
    /// ready task whose priority satisfies `accepts`, if any. A worker
    /// restricted to a priority band passes a filter that rejects the
    /// bands it doesn't service; `accepts` is checked per priority queue
    /// (cheapest-first: whichever priority order the caller provides),
    /// not per worker, so a victim holding only rejected work is skipped
    /// without ever touching its lock for an accepted priority it lacks.
    pub fn steal_from_any(&self, exclude: usize, accepts: impl Fn(TaskPriority) -> bool) -> Option<TaskHandle> {
        let count = self.locals.len();
        if count <= 1 {
            return None;
        }
        let start = self.rng.next_usize(count);
        for offset in 0..count {
            let index = (start + offset) % count;
            if index == exclude {
                continue;
            }
            for priority_index in 0..TaskPriority::COUNT {
                let priority = TaskPriority::from_index(priority_index);
                if !accepts(priority) {
                    continue;
                }
                if let Some(task) = self.locals[index].steal_priority(priority) {
                    return Some(task);
                }
            }
        }
        None
    }

    #[must_use]
    pub fn is_fully_idle(&self) -> bool {
        self.locals.iter().all(|queue| queue.is_empty()) && self.overflow.iter().all(ListQueue::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{LowLevelTask, Priority, TaskFlags};

    fn dummy_task() -> TaskHandle {
        named_task("test")
    }

    fn named_task(name: &'static str) -> TaskHandle {
        LowLevelTask::new(name, Priority::Concrete(TaskPriority::NormalForeground), TaskFlags::NONE, Box::new(|_| None))
    }

    fn dummy_background_task() -> TaskHandle {
        LowLevelTask::new("background", Priority::Concrete(TaskPriority::NormalBackground), TaskFlags::NONE, Box::new(|_| None))
    }

    #[test]
    fn push_then_pop_same_worker() {
        let registry = QueueRegistry::new(2);
        registry.push_to(0, TaskPriority::NormalForeground, dummy_task());
        assert!(registry.local(0).pop().is_some());
        assert!(registry.local(0).pop().is_none());
    }

    #[test]
    fn owner_pop_is_lifo() {
        let local = LocalQueue::new();
        local.push(TaskPriority::NormalForeground, named_task("first")).unwrap();
        local.push(TaskPriority::NormalForeground, named_task("second")).unwrap();
        assert_eq!(local.pop().unwrap().debug_name(), "second");
        assert_eq!(local.pop().unwrap().debug_name(), "first");
    }

    #[test]
    fn steal_is_fifo() {
        let local = LocalQueue::new();
        local.push(TaskPriority::NormalForeground, named_task("first")).unwrap();
        local.push(TaskPriority::NormalForeground, named_task("second")).unwrap();
        assert_eq!(local.steal_priority(TaskPriority::NormalForeground).unwrap().debug_name(), "first");
        assert_eq!(local.steal_priority(TaskPriority::NormalForeground).unwrap().debug_name(), "second");
    }

    #[test]
    fn steal_finds_another_workers_task() {
        let registry = QueueRegistry::new(4);
        registry.push_to(2, TaskPriority::NormalForeground, dummy_task());
        let stolen = registry.steal_from_any(0, |_| true);
        assert!(stolen.is_some());
    }

    #[test]
    fn steal_from_any_respects_priority_filter() {
        let registry = QueueRegistry::new(4);
        registry.push_to(2, TaskPriority::NormalBackground, dummy_background_task());
        assert!(registry.steal_from_any(0, |p| !p.is_background()).is_none());
        assert!(registry.steal_from_any(0, |_| true).is_some());
    }

    #[test]
    fn full_local_queue_spills_to_overflow() {
        let registry = QueueRegistry::new(1);
        for _ in 0..LOCAL_QUEUE_CAPACITY {
            registry.push_to(0, TaskPriority::NormalForeground, dummy_task());
        }
        registry.push_to(0, TaskPriority::NormalForeground, dummy_task());
        assert!(registry.pop_overflow(TaskPriority::NormalForeground).is_some());
    }
}
