//! The work-stealing scheduler: owns a pool of OS worker threads, each
//! running the local-queue → overflow-queue → steal → park loop, and
//! executes [`LowLevelTask`] continuations with symmetric transfer (a
//! completed task's returned continuation runs immediately on the same
//! worker instead of being re-enqueued).
//!
//! Workers are split into two classes, each with its own [`WaitingQueue`]:
//! foreground workers only service foreground-priority work off their own
//! local and overflow queues, so a flood of background tasks can't delay
//! latency-sensitive work behind a full queue. Background workers service
//! anything. A launch notifies the matching class first and falls through
//! to the other only if nobody there is idle, and a background task that
//! finds every worker already busy can grow the pool with a standby worker
//! (see [`RuntimeConfig::dynamic_thread_creation`](crate::config::RuntimeConfig::dynamic_thread_creation)),
//! up to `max_workers`.

use std::thread::{self, JoinHandle};

use nova_os::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use nova_os::sync::{Arc, Mutex, OnceLock};
use nova_os::thread::{available_parallelism, Priority};

use crate::config;
use crate::event::ManualResetEvent;
use crate::local_queue::{LocalQueue, QueueRegistry};
use crate::task::{TaskHandle, TaskPriority};
use crate::thread_state;
use crate::waiting_queue::WaitingQueue;

/// Restricts which priority bands a worker services. Lets a pool dedicate
/// a subset of workers to latency-sensitive foreground work so a flood of
/// background tasks can't delay it behind a full local queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePreference {
    #[default]
    Any,
    ForegroundOnly,
}

impl QueuePreference {
    fn accepts(self, priority: TaskPriority) -> bool {
        match self {
            QueuePreference::Any => true,
            QueuePreference::ForegroundOnly => !priority.is_background(),
        }
    }
}

std::thread_local! {
    static WORKER_INDEX: core::cell::Cell<Option<usize>> = const { core::cell::Cell::new(None) };
}

fn priority_as_u8(priority: Priority) -> u8 {
    match priority {
        Priority::Lowest => 0,
        Priority::BelowNormal => 1,
        Priority::Normal => 2,
        Priority::AboveNormal => 3,
        Priority::Highest => 4,
    }
}

fn priority_from_u8(value: u8) -> Priority {
    match value {
        0 => Priority::Lowest,
        1 => Priority::BelowNormal,
        3 => Priority::AboveNormal,
        4 => Priority::Highest,
        _ => Priority::Normal,
    }
}

/// The priority-ordered work-stealing scheduler.
pub struct Scheduler {
    registry: QueueRegistry,
    waiting_fg: OnceLock<WaitingQueue>,
    waiting_bg: OnceLock<WaitingQueue>,
    running: AtomicBool,
    started_workers: AtomicUsize,
    num_foreground: AtomicUsize,
    num_background: AtomicUsize,
    max_workers: usize,
    default_foreground: usize,
    default_background: usize,
    preferences: Mutex<Vec<QueuePreference>>,
    /// Each running worker's current logical OS priority recommendation
    /// (see [`RuntimeConfig::dynamic_prioritization`](crate::config::RuntimeConfig::dynamic_prioritization)).
    /// Mapping this onto a real OS scheduling class is left to the
    /// embedder, same as [`nova_os::thread::Priority`] itself.
    worker_priorities: Vec<AtomicU8>,
    dynamic_thread_creation: bool,
    dynamic_prioritization: bool,
    oversubscription_limit_reached: ManualResetEvent,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// `max_workers` bounds the total number of worker threads this
    /// scheduler will ever run, including standby workers created later
    /// by [`try_launch`](Self::try_launch). `default_foreground` and
    /// `default_background` are the split used by
    /// [`start_workers_default`](Self::start_workers_default).
    #[must_use]
    pub fn new(
        max_workers: usize,
        default_foreground: usize,
        default_background: usize,
        dynamic_thread_creation: bool,
        dynamic_prioritization: bool,
    ) -> Self {
        Scheduler {
            registry: QueueRegistry::new(max_workers),
            waiting_fg: OnceLock::new(),
            waiting_bg: OnceLock::new(),
            running: AtomicBool::new(false),
            started_workers: AtomicUsize::new(0),
            num_foreground: AtomicUsize::new(0),
            num_background: AtomicUsize::new(0),
            max_workers,
            default_foreground,
            default_background,
            preferences: Mutex::new(vec![QueuePreference::Any; max_workers]),
            worker_priorities: (0..max_workers).map(|_| AtomicU8::new(priority_as_u8(Priority::Normal))).collect(),
            dynamic_thread_creation,
            dynamic_prioritization,
            oversubscription_limit_reached: ManualResetEvent::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// The process-wide scheduler, sized from [`RuntimeConfig`](crate::config::RuntimeConfig)
    /// on first use. A quarter of the base parallelism (rounded up, at
    /// least one) is reserved for foreground work; the rest, plus any
    /// oversubscription headroom, is background.
    pub fn global() -> &'static Arc<Scheduler> {
        static GLOBAL: OnceLock<Arc<Scheduler>> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let config = config::runtime_config();
            let base = if config.no_threading { 0 } else { available_parallelism().get() };
            let base = if config.force_multithread { base.max(2) } else { base };
            let max = ((base as f32) * config.oversubscription_ratio).ceil() as usize;
            let max_workers = max.max(base);
            let default_foreground = if base == 0 { 0 } else { base.div_ceil(4).max(1).min(base) };
            let default_background = base - default_foreground;
            Arc::new(Scheduler::new(
                max_workers,
                default_foreground,
                default_background,
                config.dynamic_thread_creation,
                config.dynamic_prioritization,
            ))
        })
    }

    /// Starts [`default_foreground`]/[`default_background`] workers, i.e.
    /// the split [`global`](Self::global) computed from [`RuntimeConfig`](crate::config::RuntimeConfig).
    pub fn start_workers_default(self: &Arc<Self>) {
        self.start_workers(self.default_foreground, self.default_background);
    }

    /// Starts `num_foreground` foreground-only workers and `num_background`
    /// any-priority workers. A no-op if workers are already running.
    /// `num_foreground + num_background` is clamped to `max_workers`,
    /// spending any headroom removed by the clamp on background standby
    /// capacity instead.
    pub fn start_workers(self: &Arc<Self>, num_foreground: usize, num_background: usize) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let num_foreground = num_foreground.min(self.max_workers);
        let num_background = num_background.min(self.max_workers - num_foreground);
        self.num_foreground.store(num_foreground, Ordering::Relaxed);
        self.num_background.store(num_background, Ordering::Relaxed);

        {
            let mut preferences = self.preferences.lock().unwrap_or_else(|e| e.into_inner());
            for (index, preference) in preferences.iter_mut().enumerate() {
                *preference = if index < num_foreground { QueuePreference::ForegroundOnly } else { QueuePreference::Any };
            }
        }

        let standby_limit = self.max_workers - num_foreground - num_background;
        let _ = self.waiting_fg.set(WaitingQueue::new(num_foreground, 0));
        let _ = self.waiting_bg.set(WaitingQueue::new(num_background, standby_limit));

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for index in 0..num_foreground + num_background {
            let scheduler = self.clone();
            let handle = thread::Builder::new()
                .name(format!("nova-worker-{index}"))
                .spawn(move || scheduler.worker_main(index))
                .expect("failed to spawn worker thread");
            handles.push(handle);
            self.started_workers.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Signals every worker to exit once its current task completes, then
    /// joins all worker threads. If `drain` is set, any tasks still sitting
    /// in a local or overflow queue once every worker has exited (including
    /// tasks launched while no worker was ever started) are run inline on
    /// the calling thread, continuation chains and all, before returning.
    pub fn stop_workers(&self, drain: bool) {
        if self.running.swap(false, Ordering::AcqRel) {
            if let Some(waiting) = self.waiting_fg.get() {
                waiting.notify(self.num_foreground.load(Ordering::Relaxed));
            }
            if let Some(waiting) = self.waiting_bg.get() {
                waiting.notify(self.max_workers);
            }
            let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            for handle in handles.drain(..) {
                let _ = handle.join();
            }
            self.started_workers.store(0, Ordering::Relaxed);
        }
        if drain {
            self.drain_remaining();
        }
    }

    /// Runs every task still queued (local or overflow) to completion,
    /// inline on the calling thread. Looping until nothing is left handles
    /// continuations and tasks a drained task might itself launch.
    fn drain_remaining(&self) {
        loop {
            let mut ran_any = false;
            for priority_index in 0..TaskPriority::COUNT {
                let priority = TaskPriority::from_index(priority_index);
                while let Some(task) = self.registry.pop_overflow(priority) {
                    task.0.try_execute();
                    ran_any = true;
                }
            }
            for index in 0..self.registry.worker_count() {
                let local = self.registry.local(index);
                for priority_index in 0..TaskPriority::COUNT {
                    while let Some(task) = local.pop_priority(TaskPriority::from_index(priority_index)) {
                        task.0.try_execute();
                        ran_any = true;
                    }
                }
            }
            if !ran_any {
                break;
            }
        }
    }

    pub fn restart_workers(self: &Arc<Self>) {
        let num_foreground = self.num_foreground.load(Ordering::Relaxed);
        let num_background = self.num_background.load(Ordering::Relaxed);
        self.stop_workers(false);
        self.start_workers(num_foreground, num_background);
    }

    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.started_workers.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn max_num_workers(&self) -> usize {
        self.max_workers
    }

    #[must_use]
    pub fn is_multithreaded(&self) -> bool {
        self.started_workers.load(Ordering::Relaxed) > 1
    }

    #[must_use]
    pub fn is_worker_thread() -> bool {
        WORKER_INDEX.with(|cell| cell.get().is_some())
    }

    #[must_use]
    pub fn is_oversubscription_limit_reached(&self) -> bool {
        self.oversubscription_limit_reached.poll()
    }

    #[must_use]
    pub fn oversubscription_limit_reached_event(&self) -> &ManualResetEvent {
        &self.oversubscription_limit_reached
    }

    /// The logical OS priority recommendation currently in effect for
    /// worker `index` (see [`RuntimeConfig::dynamic_prioritization`](crate::config::RuntimeConfig::dynamic_prioritization)).
    /// Out-of-range indices report [`Priority::Normal`].
    #[must_use]
    pub fn worker_priority(&self, index: usize) -> Priority {
        self.worker_priorities.get(index).map_or(Priority::Normal, |p| priority_from_u8(p.load(Ordering::Relaxed)))
    }

    #[must_use]
    pub fn standby_workers_active(&self) -> usize {
        self.waiting_bg.get().map_or(0, WaitingQueue::standby_active)
    }

    /// Schedules `task`, preferring the calling worker's own local queue if
    /// called from a worker thread, and returns whether this call is the
    /// one that transitioned it from `Ready` to `Scheduled`.
    ///
    /// The calling thread's [`WorkerState`](crate::thread_state::WorkerState)
    /// is marked as having a pending wakeup for the duration — see
    /// [`has_launch_in_progress`](Self::has_launch_in_progress).
    pub fn try_launch(self: &Arc<Self>, task: TaskHandle) -> bool {
        let state = thread_state::current();
        state.mark_pending_wake();
        let launched = self.try_launch_inner(task);
        state.clear_pending_wake();
        launched
    }

    fn try_launch_inner(self: &Arc<Self>, task: TaskHandle) -> bool {
        if !task.try_launch() {
            return false;
        }
        let priority = task.priority();
        match WORKER_INDEX.with(core::cell::Cell::get) {
            Some(index) => self.registry.push_to(index, priority, task),
            None => self.registry.push_overflow(priority, task),
        }
        let woken = self.notify_for(priority);
        if priority.is_background() && woken == 0 {
            self.maybe_grow_background_pool();
        }
        true
    }

    /// True if some thread (worker or not) is currently inside
    /// [`try_launch`](Self::try_launch) — i.e. has pushed or is about to
    /// push a task that isn't yet visible in any queue. Shutdown can use
    /// this to detect a launch racing the final `stop_workers` call.
    #[must_use]
    pub fn has_launch_in_progress() -> bool {
        thread_state::has_pending_wake_up()
    }

    /// Notifies the waiting queue matching `priority`'s class, falling
    /// through to the other class if nobody there is idle (a rare worker
    /// of the "wrong" class may still end up running this task, see
    /// [`next_ready_task`](Self::next_ready_task)). Returns how many
    /// workers were actually woken.
    fn notify_for(&self, priority: TaskPriority) -> usize {
        let (primary, secondary) =
            if priority.is_background() { (self.waiting_bg.get(), self.waiting_fg.get()) } else { (self.waiting_fg.get(), self.waiting_bg.get()) };
        let woken = primary.map_or(0, |queue| queue.notify(1));
        if woken == 0 {
            if let Some(queue) = secondary {
                return queue.notify(1);
            }
        }
        woken
    }

    /// Reserves and spawns a standby background worker if the pool has
    /// room and [`dynamic_thread_creation`](crate::config::RuntimeConfig::dynamic_thread_creation)
    /// is enabled, signaling [`oversubscription_limit_reached_event`](Self::oversubscription_limit_reached_event)
    /// once `max_workers` is exhausted instead.
    fn maybe_grow_background_pool(self: &Arc<Self>) {
        if !self.dynamic_thread_creation {
            return;
        }
        let Some(waiting_bg) = self.waiting_bg.get() else {
            return;
        };
        match waiting_bg.prepare_standby() {
            Some(standby_slot) => {
                let index = self.num_foreground.load(Ordering::Relaxed) + self.num_background.load(Ordering::Relaxed) + standby_slot;
                let scheduler = self.clone();
                let handle = thread::Builder::new()
                    .name(format!("nova-worker-standby-{index}"))
                    .spawn(move || scheduler.worker_main(index))
                    .expect("failed to spawn standby worker thread");
                self.handles.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
                self.started_workers.fetch_add(1, Ordering::Relaxed);
                waiting_bg.commit_standby(standby_slot);
            }
            None => self.oversubscription_limit_reached.notify(),
        }
    }

    fn worker_main(self: Arc<Self>, index: usize) {
        WORKER_INDEX.with(|cell| cell.set(Some(index)));
        let local = self.registry.local(index);
        let preference = self.preferences.lock().unwrap_or_else(|e| e.into_inner())[index];
        let waiting = match preference {
            QueuePreference::ForegroundOnly => self.waiting_fg.get(),
            QueuePreference::Any => self.waiting_bg.get(),
        };
        let Some(waiting) = waiting else {
            return;
        };
        let local_index = match preference {
            QueuePreference::ForegroundOnly => index,
            QueuePreference::Any => index - self.num_foreground.load(Ordering::Relaxed),
        };

        while self.running.load(Ordering::Acquire) {
            if let Some((task, borrowed)) = self.next_ready_task(index, &local, preference) {
                self.run_task(index, borrowed, task);
                continue;
            }

            let ticket = waiting.prepare_wait(local_index);
            // Re-check after registering as idle: a task may have been
            // pushed between the failed pop above and `prepare_wait`.
            if let Some((task, borrowed)) = self.next_ready_task(index, &local, preference) {
                waiting.cancel_wait(ticket);
                self.run_task(index, borrowed, task);
                continue;
            }
            if !self.running.load(Ordering::Acquire) {
                waiting.cancel_wait(ticket);
                break;
            }
            waiting.commit_wait(ticket);
        }
    }

    /// Executes `task`, temporarily lowering this worker's logical
    /// priority for the duration if it's a background task a non-background
    /// worker picked up as a last resort (see [`next_ready_task`](Self::next_ready_task)).
    fn run_task(&self, index: usize, borrowed: bool, task: TaskHandle) {
        if borrowed {
            self.worker_priorities[index].store(priority_as_u8(Priority::Lowest), Ordering::Relaxed);
        }
        task.0.try_execute();
        if borrowed {
            self.worker_priorities[index].store(priority_as_u8(Priority::Normal), Ordering::Relaxed);
        }
    }

    /// Finds the next task this worker should run, and whether running it
    /// means temporarily stepping outside `preference`'s priority band.
    ///
    /// Own local and overflow queues, then a preference-respecting steal,
    /// are all tried first. Only once all of those come up empty — and
    /// only with [`dynamic_prioritization`](crate::config::RuntimeConfig::dynamic_prioritization)
    /// enabled — does a worker reach past its own band and steal anything
    /// at all, which should be rare: it only happens when every worker
    /// that could normally service that task is itself busy or idle with
    /// no such work queued.
    fn next_ready_task(&self, index: usize, local: &LocalQueue, preference: QueuePreference) -> Option<(TaskHandle, bool)> {
        for priority_index in 0..TaskPriority::COUNT {
            let priority = TaskPriority::from_index(priority_index);
            if !preference.accepts(priority) {
                continue;
            }
            if let Some(task) = local.pop_priority(priority) {
                return Some((task, false));
            }
        }
        for priority_index in 0..TaskPriority::COUNT {
            let priority = TaskPriority::from_index(priority_index);
            if !preference.accepts(priority) {
                continue;
            }
            if let Some(task) = self.registry.pop_overflow(priority) {
                return Some((task, false));
            }
        }
        if let Some(task) = self.registry.steal_from_any(index, |priority| preference.accepts(priority)) {
            return Some((task, false));
        }
        if self.dynamic_prioritization {
            for priority_index in 0..TaskPriority::COUNT {
                let priority = TaskPriority::from_index(priority_index);
                if preference.accepts(priority) {
                    // Already tried above with this exact priority allowed.
                    continue;
                }
                if let Some(task) = self.registry.pop_overflow(priority) {
                    return Some((task, true));
                }
            }
            if let Some(task) = self.registry.steal_from_any(index, |_| true) {
                let borrowed = !preference.accepts(task.priority());
                return Some((task, borrowed));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{LowLevelTask, Priority as TaskHandlePriority, TaskFlags};
    use std::sync::atomic::{AtomicUsize as StdAtomicUsize, Ordering as O};
    use std::sync::Arc as StdArc;
    use std::time::Duration;

    fn task_of(name: &'static str, priority: TaskPriority, on_run: impl FnMut(bool) -> Option<TaskHandle> + Send + 'static) -> TaskHandle {
        LowLevelTask::new(name, TaskHandlePriority::Concrete(priority), TaskFlags::NONE, Box::new(on_run))
    }

    #[test]
    fn launched_task_eventually_runs() {
        let scheduler = StdArc::new(Scheduler::new(2, 1, 1, true, true));
        scheduler.start_workers(1, 1);

        let ran = StdArc::new(StdAtomicUsize::new(0));
        let ran_clone = ran.clone();
        let task = task_of("test", TaskPriority::NormalForeground, move |_| {
            ran_clone.fetch_add(1, O::SeqCst);
            None
        });
        assert!(scheduler.try_launch(task));

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(ran.load(O::SeqCst), 1);

        scheduler.stop_workers(false);
    }

    #[test]
    fn fire_and_forget_drains_without_ever_starting_workers() {
        let scheduler = StdArc::new(Scheduler::new(2, 1, 1, true, true));

        let ran = StdArc::new(StdAtomicUsize::new(0));
        let ran_clone = ran.clone();
        let task = task_of("fire-and-forget", TaskPriority::NormalForeground, move |_| {
            ran_clone.store(42, O::SeqCst);
            None
        });
        assert!(scheduler.try_launch(task));
        assert_eq!(ran.load(O::SeqCst), 0);

        scheduler.stop_workers(true);
        assert_eq!(ran.load(O::SeqCst), 42);
    }

    #[test]
    fn continuations_run_via_symmetric_transfer() {
        let scheduler = StdArc::new(Scheduler::new(1, 0, 1, true, true));
        scheduler.start_workers(0, 1);

        let ran = StdArc::new(StdAtomicUsize::new(0));
        let ran_clone = ran.clone();
        let task = task_of("first", TaskPriority::NormalBackground, move |_| {
            let ran_clone2 = ran_clone.clone();
            let next = task_of("second", TaskPriority::NormalBackground, move |_| {
                ran_clone2.fetch_add(1, O::SeqCst);
                None
            });
            next.try_launch();
            Some(next)
        });
        assert!(scheduler.try_launch(task));

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(ran.load(O::SeqCst), 1);

        scheduler.stop_workers(false);
    }

    #[test]
    fn try_launch_does_not_leave_a_stale_pending_wake_behind() {
        let scheduler = StdArc::new(Scheduler::new(1, 1, 0, false, false));
        assert!(!Scheduler::has_launch_in_progress());
        let task = task_of("test", TaskPriority::NormalForeground, |_| None);
        assert!(scheduler.try_launch(task));
        assert!(!Scheduler::has_launch_in_progress());
        scheduler.stop_workers(true);
    }

    #[test]
    fn foreground_worker_never_services_background_work_via_its_own_overflow() {
        // One foreground-only worker, zero background workers, dynamic
        // prioritization disabled: a background task must never run.
        let scheduler = StdArc::new(Scheduler::new(1, 1, 0, false, false));
        scheduler.start_workers(1, 0);

        let ran = StdArc::new(StdAtomicUsize::new(0));
        let ran_clone = ran.clone();
        let task = task_of("background", TaskPriority::NormalBackground, move |_| {
            ran_clone.fetch_add(1, O::SeqCst);
            None
        });
        assert!(scheduler.try_launch(task));

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ran.load(O::SeqCst), 0);

        scheduler.stop_workers(true);
        assert_eq!(ran.load(O::SeqCst), 1);
    }

    #[test]
    fn dynamic_prioritization_lets_a_foreground_worker_borrow_background_work() {
        // Same pool shape, but with dynamic prioritization enabled: the
        // idle foreground worker should eventually borrow the background
        // task itself, marked as borrowed (lowered priority) while it runs.
        let scheduler = StdArc::new(Scheduler::new(1, 1, 0, false, true));
        scheduler.start_workers(1, 0);

        let ran = StdArc::new(StdAtomicUsize::new(0));
        let ran_clone = ran.clone();
        let lowest_seen = StdArc::new(core::sync::atomic::AtomicBool::new(false));
        let lowest_seen_clone = lowest_seen.clone();
        let scheduler_clone = scheduler.clone();
        let task = task_of("background", TaskPriority::NormalBackground, move |_| {
            if scheduler_clone.worker_priority(0) == Priority::Lowest {
                lowest_seen_clone.store(true, O::SeqCst);
            }
            ran_clone.fetch_add(1, O::SeqCst);
            None
        });
        assert!(scheduler.try_launch(task));

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(ran.load(O::SeqCst), 1);
        assert!(lowest_seen.load(O::SeqCst));
        assert_eq!(scheduler.worker_priority(0), Priority::Normal);

        scheduler.stop_workers(false);
    }

    #[test]
    fn oversubscription_limit_reached_once_standby_capacity_is_exhausted() {
        // max_workers == default background workers: no room for even one
        // standby worker, so a background launch that finds the sole
        // worker already busy should immediately trip the oversubscription
        // event instead of spawning anything.
        let scheduler = StdArc::new(Scheduler::new(1, 0, 1, true, true));
        scheduler.start_workers(0, 1);
        assert!(!scheduler.is_oversubscription_limit_reached());

        let blocker_running = StdArc::new(core::sync::atomic::AtomicBool::new(false));
        let blocker_running_clone = blocker_running.clone();
        let release = StdArc::new(core::sync::atomic::AtomicBool::new(false));
        let release_clone = release.clone();
        let blocker = task_of("blocker", TaskPriority::NormalBackground, move |_| {
            blocker_running_clone.store(true, O::SeqCst);
            while !release_clone.load(O::SeqCst) {
                std::thread::yield_now();
            }
            None
        });
        assert!(scheduler.try_launch(blocker));
        while !blocker_running.load(O::SeqCst) {
            std::thread::yield_now();
        }

        let task = task_of("background", TaskPriority::NormalBackground, |_| None);
        assert!(scheduler.try_launch(task));

        std::thread::sleep(Duration::from_millis(50));
        assert!(scheduler.is_oversubscription_limit_reached());
        assert_eq!(scheduler.standby_workers_active(), 0);

        release.store(true, O::SeqCst);
        scheduler.stop_workers(true);
    }

    #[test]
    fn dynamic_thread_creation_spawns_a_standby_worker_under_load() {
        let scheduler = StdArc::new(Scheduler::new(2, 0, 1, true, true));
        scheduler.start_workers(0, 1);

        // Occupy the sole background worker so the next launch finds no
        // idle parker and has to grow the pool.
        let blocker_running = StdArc::new(core::sync::atomic::AtomicBool::new(false));
        let blocker_running_clone = blocker_running.clone();
        let release = StdArc::new(core::sync::atomic::AtomicBool::new(false));
        let release_clone = release.clone();
        let blocker = task_of("blocker", TaskPriority::NormalBackground, move |_| {
            blocker_running_clone.store(true, O::SeqCst);
            while !release_clone.load(O::SeqCst) {
                std::thread::yield_now();
            }
            None
        });
        assert!(scheduler.try_launch(blocker));
        while !blocker_running.load(O::SeqCst) {
            std::thread::yield_now();
        }

        let ran = StdArc::new(StdAtomicUsize::new(0));
        let ran_clone = ran.clone();
        let task = task_of("second", TaskPriority::NormalBackground, move |_| {
            ran_clone.fetch_add(1, O::SeqCst);
            None
        });
        assert!(scheduler.try_launch(task));

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(scheduler.standby_workers_active(), 1);
        assert_eq!(ran.load(O::SeqCst), 1);

        release.store(true, O::SeqCst);
        scheduler.stop_workers(false);
    }
}
