//! The low-level task: a cache-line-sized unit of work with a packed
//! atomic state word, an inline-stored runnable, cancellation and
//! expediting.
#![expect(unsafe_code, reason = "runnable access is guarded by the Running-transition CAS")]

use core::cell::UnsafeCell;
use core::fmt;

use nova_os::sync::Arc;
use nova_os::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use nova_os::utils::Backoff;

use crate::parking_lot;

// -----------------------------------------------------------------------------
// Priority

/// Scheduling priority of a [`LowLevelTask`].
///
/// Priorities order as `HighForeground > NormalForeground > HighBackground >
/// NormalBackground > LowBackground`; within a priority, order is *not*
/// FIFO (non-goal: fair/FIFO task ordering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TaskPriority {
    HighForeground = 0,
    NormalForeground = 1,
    HighBackground = 2,
    NormalBackground = 3,
    LowBackground = 4,
}

impl TaskPriority {
    pub const COUNT: usize = 5;

    /// Whether this priority belongs to a background worker class.
    #[must_use]
    pub const fn is_background(self) -> bool {
        matches!(
            self,
            TaskPriority::HighBackground | TaskPriority::NormalBackground | TaskPriority::LowBackground
        )
    }

    #[must_use]
    pub(crate) const fn as_index(self) -> usize {
        self as u8 as usize
    }

    #[must_use]
    pub(crate) const fn from_index(index: usize) -> TaskPriority {
        match index {
            0 => TaskPriority::HighForeground,
            1 => TaskPriority::NormalForeground,
            2 => TaskPriority::HighBackground,
            3 => TaskPriority::NormalBackground,
            _ => TaskPriority::LowBackground,
        }
    }
}

/// A priority request passed to [`LowLevelTask::new`]: either a concrete
/// priority, or "inherit from the currently active task on this thread".
///
/// `Inherit` is resolved *eagerly*, at construction time, against
/// [`active_task`] — not lazily at launch time.
#[derive(Debug, Clone, Copy)]
pub enum Priority {
    Concrete(TaskPriority),
    Inherit,
}

impl Priority {
    fn resolve(self) -> TaskPriority {
        match self {
            Priority::Concrete(p) => p,
            Priority::Inherit => active_task()
                .map(|t| t.priority())
                .unwrap_or(TaskPriority::NormalForeground),
        }
    }
}

// -----------------------------------------------------------------------------
// Flags

/// Construction-time flags for a [`LowLevelTask`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFlags(u8);

impl TaskFlags {
    pub const NONE: TaskFlags = TaskFlags(0);
    /// Lets [`LowLevelTask::wait_until_completed`] spin instead of parking.
    /// Only worth setting on tasks expected to finish quickly, where paying
    /// for a park/wake round trip would cost more than the spin itself.
    pub const ALLOW_BUSY_WAITING: TaskFlags = TaskFlags(1 << 0);
    /// Without this flag, [`LowLevelTask::try_cancel`] is a no-op: the task
    /// always runs to completion as if cancellation were never requested.
    pub const ALLOW_CANCELLATION: TaskFlags = TaskFlags(1 << 1);
    pub const ALLOW_EVERYTHING: TaskFlags = TaskFlags(Self::ALLOW_BUSY_WAITING.0 | Self::ALLOW_CANCELLATION.0);

    #[must_use]
    pub const fn contains(self, other: TaskFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for TaskFlags {
    type Output = TaskFlags;
    fn bitor(self, rhs: TaskFlags) -> TaskFlags {
        TaskFlags(self.0 | rhs.0)
    }
}

/// Flags accepted by [`LowLevelTask::try_cancel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelFlags(u8);

impl CancelFlags {
    pub const NONE: CancelFlags = CancelFlags(0);
    /// Force the task to be launched (and thus executed with
    /// `b_not_canceled = false`) if it was never launched.
    pub const TRY_LAUNCH_ON_SUCCESS: CancelFlags = CancelFlags(1 << 0);
    /// Mark the cancellation as having occurred before the task was ever
    /// scheduled (informational; affects nothing beyond documentation today).
    pub const PRELAUNCH_CANCELLATION: CancelFlags = CancelFlags(1 << 1);

    #[must_use]
    pub const fn contains(self, other: CancelFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for CancelFlags {
    type Output = CancelFlags;
    fn bitor(self, rhs: CancelFlags) -> CancelFlags {
        CancelFlags(self.0 | rhs.0)
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::NormalForeground
    }
}

// -----------------------------------------------------------------------------
// Packed state word

const SCHEDULED: u32 = 1 << 0;
const RUNNING: u32 = 1 << 1;
const EXPEDITING: u32 = 1 << 2;
const EXPEDITED: u32 = 1 << 3;
const COMPLETED: u32 = 1 << 4;
const CANCELED: u32 = 1 << 5;

// -----------------------------------------------------------------------------
// Runnable

/// The task body. Receives `true` when it should run normally and `false`
/// when the task was cancelled before execution (the cancellation is
/// advisory — the body decides whether to honor it). May return a
/// continuation task: the scheduler executes it inline, tail-call style,
/// instead of returning to the queue ("symmetric transfer").
pub type Runnable = Box<dyn FnOnce(bool) -> Option<TaskHandle> + Send>;

/// A reference-counted handle to a [`LowLevelTask`].
///
/// Cloning is cheap (bumps a refcount); the scheduler, the launcher and any
/// continuation each hold their own handle, mirroring the original's
/// ref-counted ownership model (distilled spec §9 "Ownership & cyclic
/// references": `Arc`-style handles with no separate per-queue-node
/// allocation).
#[derive(Clone)]
pub struct TaskHandle(pub(crate) Arc<LowLevelTask>);

impl TaskHandle {
    #[must_use]
    pub fn priority(&self) -> TaskPriority {
        self.0.priority()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl core::ops::Deref for TaskHandle {
    type Target = LowLevelTask;
    fn deref(&self) -> &LowLevelTask {
        &self.0
    }
}

// -----------------------------------------------------------------------------
// LowLevelTask

/// Cache-line-sized unit of work: a packed atomic state word, a boxed
/// runnable, and an opaque user-data pointer inheritable by continuations.
///
/// See distilled spec §4.10 for the full state machine; `debug_name` is
/// kept as a plain `&'static str` field rather than bit-packed into the
/// state word (string slices are fat pointers and don't fit the remaining
/// bits of a 32-bit word) — see `DESIGN.md`.
pub struct LowLevelTask {
    state: AtomicU32,
    priority: AtomicU8,
    flags: TaskFlags,
    debug_name: &'static str,
    runnable: UnsafeCell<Option<Runnable>>,
    user_data: core::sync::atomic::AtomicPtr<()>,
}

// SAFETY: `runnable` is only ever touched by the single thread that wins
// the Scheduled -> Running CAS (see `take_runnable`), so concurrent access
// never occurs despite the `UnsafeCell`.
unsafe impl Send for LowLevelTask {}
// SAFETY: same as above; shared access to `&LowLevelTask` never reaches
// into `runnable` without having first won the CAS.
unsafe impl Sync for LowLevelTask {}

impl LowLevelTask {
    /// Construct a new, `Ready` task.
    ///
    /// `priority = Priority::Inherit` is resolved immediately against
    /// [`active_task`] (distilled spec §9 "Priority inheritance").
    #[must_use]
    pub fn new(
        debug_name: &'static str,
        priority: Priority,
        flags: TaskFlags,
        runnable: Runnable,
    ) -> TaskHandle {
        let resolved = priority.resolve();
        let user_data = active_task()
            .map(|t| t.user_data.load(Ordering::Relaxed))
            .unwrap_or(core::ptr::null_mut());
        TaskHandle(Arc::new(LowLevelTask {
            state: AtomicU32::new(0),
            priority: AtomicU8::new(resolved as u8),
            flags,
            debug_name,
            runnable: UnsafeCell::new(Some(runnable)),
            user_data: core::sync::atomic::AtomicPtr::new(user_data),
        }))
    }

    #[must_use]
    pub fn debug_name(&self) -> &'static str {
        self.debug_name
    }

    #[must_use]
    pub fn priority(&self) -> TaskPriority {
        TaskPriority::from_index(self.priority.load(Ordering::Relaxed) as usize)
    }

    #[must_use]
    pub fn flags(&self) -> TaskFlags {
        self.flags
    }

    #[must_use]
    pub fn user_data(&self) -> *mut () {
        self.user_data.load(Ordering::Relaxed)
    }

    pub fn set_user_data(&self, data: *mut ()) {
        self.user_data.store(data, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == 0
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state.load(Ordering::Acquire) & COMPLETED != 0
    }

    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) & CANCELED != 0
    }

    #[must_use]
    pub fn was_expedited(&self) -> bool {
        self.state.load(Ordering::Acquire) & EXPEDITED != 0
    }

    /// `fetch_or(Scheduled, Release)`; returns `true` the one time the flag
    /// transitions from unset to set.
    fn try_prepare_launch(&self) -> bool {
        self.state.fetch_or(SCHEDULED, Ordering::Release) & SCHEDULED == 0
    }

    /// Places the task in `Scheduled` state. Returns `false` if it was
    /// already scheduled (by a previous `try_launch`, `try_execute`, or a
    /// forcing `try_cancel`).
    #[must_use]
    pub fn try_launch(&self) -> bool {
        self.try_prepare_launch()
    }

    /// Runs the task body to completion, chasing any continuation chain
    /// inline ("symmetric transfer" — distilled spec §9). Returns `true`
    /// iff *this* task's body actually ran (as opposed to it already being
    /// completed or not yet schedulable by this call).
    pub fn try_execute(self: &Arc<Self>) -> bool {
        let was_not_set = self.try_prepare_launch();
        if !was_not_set && self.state.load(Ordering::Acquire) & RUNNING != 0 {
            // Another thread already won the race to run this task.
            return false;
        }

        let mut current = self.clone();
        loop {
            if current.state.fetch_or(RUNNING, Ordering::AcqRel) & RUNNING != 0 {
                // Lost the race for `current` (only matters for continuations
                // handed to us by our own runnable, so this should not
                // actually happen — kept for defensive symmetry).
                break;
            }

            let not_canceled = current.state.load(Ordering::Acquire) & CANCELED == 0;

            // SAFETY: we just won the unique `Ready/Scheduled -> Running`
            // transition on `current` via the fetch_or above, so no other
            // thread may observe or mutate `runnable` concurrently.
            let runnable = unsafe { &mut *current.runnable.get() }.take();

            let continuation = with_active_task(Some(TaskHandle(current.clone())), || {
                runnable.and_then(|f| f(not_canceled))
            });

            current.state.fetch_or(COMPLETED, Ordering::Release);
            parking_lot::global().wake_all(current.wait_address());

            match continuation {
                Some(next) => current = next.0,
                None => break,
            }
        }
        was_not_set
    }

    /// Atomically sets `CanceledFlag`. Without `ALLOW_CANCELLATION` set at
    /// construction time, this is a no-op — the task always runs to
    /// completion as if cancellation had never been requested. With the
    /// flag set, `TRY_LAUNCH_ON_SUCCESS` (the default policy) forces a task
    /// that was never launched through launch-and-execute so that any
    /// continuation still fires exactly once, with `b_not_canceled == false`.
    pub fn try_cancel(self: &Arc<Self>, extra: CancelFlags) -> bool {
        if !self.flags.contains(TaskFlags::ALLOW_CANCELLATION) {
            return false;
        }
        let flags = CancelFlags::TRY_LAUNCH_ON_SUCCESS | extra;
        let prev = self.state.fetch_or(CANCELED, Ordering::AcqRel);
        let newly_canceled = prev & CANCELED == 0;

        if newly_canceled
            && flags.contains(CancelFlags::TRY_LAUNCH_ON_SUCCESS)
            && prev & SCHEDULED == 0
        {
            self.try_execute();
        }
        newly_canceled
    }

    /// Clears `CanceledFlag`, returning the task to `Ready`. Succeeds only
    /// if the task has not yet started running.
    pub fn try_revive(&self) -> bool {
        let snapshot = self.state.load(Ordering::Acquire);
        if snapshot & RUNNING != 0 {
            return false;
        }
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                if s & RUNNING != 0 {
                    None
                } else {
                    Some(s & !CANCELED)
                }
            })
            .is_ok()
    }

    /// Succeeds only when the task is `Scheduled` but not yet `Running`;
    /// runs the body on the calling thread and marks it
    /// `ExpeditedAndCompleted`.
    pub fn try_expedite(self: &Arc<Self>) -> bool {
        let snapshot = self.state.load(Ordering::Acquire);
        if snapshot & SCHEDULED == 0 || snapshot & RUNNING != 0 {
            return false;
        }
        let won = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                if s & RUNNING != 0 {
                    None
                } else {
                    Some(s | EXPEDITING | RUNNING)
                }
            })
            .is_ok();
        if !won {
            return false;
        }

        let not_canceled = self.state.load(Ordering::Acquire) & CANCELED == 0;
        // SAFETY: we just won the unique `-> Running` transition above.
        let runnable = unsafe { &mut *self.runnable.get() }.take();
        let continuation = runnable.and_then(|f| f(not_canceled));
        self.state
            .fetch_or(EXPEDITED | COMPLETED, Ordering::Release);
        parking_lot::global().wake_all(self.wait_address());

        if let Some(next) = continuation {
            next.0.try_execute();
        }
        true
    }

    fn wait_address(&self) -> usize {
        self as *const Self as usize
    }

    /// Blocks the calling thread until this task is `Completed`. Tasks
    /// built with `ALLOW_BUSY_WAITING` spin instead of parking — worth it
    /// only when the caller expects the wait to be short. Otherwise parks
    /// on the process-wide parking lot, woken by `try_execute`/`try_expedite`
    /// the moment `CompletedFlag` is set.
    pub fn wait_until_completed(self: &Arc<Self>) {
        if self.is_completed() {
            return;
        }
        if self.flags.contains(TaskFlags::ALLOW_BUSY_WAITING) {
            let backoff = Backoff::new();
            while !self.is_completed() {
                backoff.spin();
            }
            return;
        }
        let addr = self.wait_address();
        while !self.is_completed() {
            parking_lot::global().wait(addr, || !self.is_completed(), || {});
        }
    }
}

impl Drop for LowLevelTask {
    fn drop(&mut self) {
        debug_assert!(
            self.is_completed(),
            "a LowLevelTask must be Completed before being dropped"
        );
    }
}

impl fmt::Debug for LowLevelTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LowLevelTask")
            .field("debug_name", &self.debug_name)
            .field("priority", &self.priority())
            .field("is_completed", &self.is_completed())
            .field("was_cancelled", &self.was_cancelled())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Thread-local active task

std::thread_local! {
    static ACTIVE_TASK: core::cell::RefCell<Option<TaskHandle>> = const { core::cell::RefCell::new(None) };
}

/// The task currently executing on the calling thread, if any. Used for
/// priority and user-data inheritance by freshly constructed tasks.
#[must_use]
pub fn active_task() -> Option<TaskHandle> {
    ACTIVE_TASK.with(|cell| cell.borrow().clone())
}

/// Sets the thread-local active task for the duration of `f`, restoring the
/// previous value afterwards. Used by the worker loop around task execution.
pub(crate) fn with_active_task<R>(task: Option<TaskHandle>, f: impl FnOnce() -> R) -> R {
    let prev = ACTIVE_TASK.with(|cell| cell.replace(task));
    let result = f();
    ACTIVE_TASK.with(|cell| *cell.borrow_mut() = prev);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as O};
    use std::time::Duration;

    fn task_with(f: impl FnOnce(bool) -> Option<TaskHandle> + Send + 'static) -> TaskHandle {
        LowLevelTask::new("test", Priority::Concrete(TaskPriority::NormalForeground), TaskFlags::NONE, Box::new(f))
    }

    fn cancelable_task_with(f: impl FnOnce(bool) -> Option<TaskHandle> + Send + 'static) -> TaskHandle {
        LowLevelTask::new(
            "test",
            Priority::Concrete(TaskPriority::NormalForeground),
            TaskFlags::ALLOW_CANCELLATION,
            Box::new(f),
        )
    }

    #[test]
    fn execute_runs_body_exactly_once() {
        let count = StdArc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let task = task_with(move |_| {
            count2.fetch_add(1, O::SeqCst);
            None
        });
        assert!(task.0.try_execute());
        assert!(!task.0.try_execute());
        assert_eq!(count.load(O::SeqCst), 1);
    }

    #[test]
    fn is_completed_is_monotone() {
        let task = task_with(|_| None);
        assert!(!task.is_completed());
        task.0.try_execute();
        assert!(task.is_completed());
        task.0.try_execute();
        assert!(task.is_completed());
    }

    #[test]
    fn continuation_runs_via_try_execute() {
        let ran = StdArc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let task = task_with(move |_| Some(task_with(move |_| { ran2.store(true, O::SeqCst); None })));
        task.0.try_execute();
        assert!(ran.load(O::SeqCst));
    }

    #[test]
    fn cancel_before_launch_forces_run_with_not_canceled_false() {
        let observed = StdArc::new(AtomicBool::new(true));
        let observed2 = observed.clone();
        let task = cancelable_task_with(move |not_canceled| {
            observed2.store(not_canceled, O::SeqCst);
            None
        });
        assert!(task.0.try_cancel(CancelFlags::NONE));
        assert!(task.is_completed());
        assert!(task.was_cancelled());
        assert!(!observed.load(O::SeqCst));
    }

    #[test]
    fn cancel_without_allow_cancellation_flag_is_a_no_op() {
        let ran = StdArc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let task = task_with(move |_| {
            ran2.store(true, O::SeqCst);
            None
        });
        assert!(!task.0.try_cancel(CancelFlags::NONE));
        assert!(!task.was_cancelled());
        assert!(!task.is_completed());
        task.0.try_execute();
        assert!(ran.load(O::SeqCst));
    }

    #[test]
    fn cancel_race_fires_continuation_exactly_once() {
        // Mirrors the "task cancellation race" scenario: a task is launched
        // and immediately raced against a cancellation attempt from another
        // thread. Exactly one of {ran with true, ran with false} happens,
        // and completion is observed promptly either way.
        for _ in 0..200 {
            let runs = StdArc::new(AtomicUsize::new(0));
            let runs2 = runs.clone();
            let task = cancelable_task_with(move |_| {
                runs2.fetch_add(1, O::SeqCst);
                None
            });
            let task_for_cancel = task.clone();
            let canceller = std::thread::spawn(move || {
                task_for_cancel.0.try_cancel(CancelFlags::NONE);
            });
            task.0.try_execute();
            canceller.join().unwrap();
            assert!(task.is_completed());
            assert_eq!(runs.load(O::SeqCst), 1);
        }
    }

    #[test]
    fn revive_returns_canceled_task_to_ready() {
        // Set CANCELED directly, bypassing try_cancel's forced launch, so
        // the task is still Ready and revive has something to undo.
        let task = task_with(|_| None);
        task.0.state.fetch_or(CANCELED, O::SeqCst);
        assert!(task.was_cancelled());
        assert!(task.0.try_revive());
        assert!(!task.was_cancelled());
        task.0.try_execute();
    }

    #[test]
    fn expedite_runs_inline_before_a_worker_would() {
        let ran = StdArc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let task = task_with(move |_| {
            ran2.store(true, O::SeqCst);
            None
        });
        assert!(task.0.try_launch());
        assert!(task.0.try_expedite());
        assert!(ran.load(O::SeqCst));
        assert!(task.was_expedited());
        assert!(task.is_completed());
    }

    #[test]
    fn expedite_fails_once_already_running() {
        let task = task_with(|_| {
            std::thread::sleep(Duration::from_millis(50));
            None
        });
        assert!(task.0.try_launch());
        let task2 = task.clone();
        let runner = std::thread::spawn(move || {
            task2.0.try_execute();
        });
        std::thread::sleep(Duration::from_millis(10));
        assert!(!task.0.try_expedite());
        runner.join().unwrap();
    }

    #[test]
    fn inherited_priority_resolves_from_active_task() {
        let outer = LowLevelTask::new(
            "outer",
            Priority::Concrete(TaskPriority::HighBackground),
            TaskFlags::NONE,
            Box::new(|_| None),
        );
        let inner_priority = StdArc::new(std::sync::Mutex::new(None));
        let inner_priority2 = inner_priority.clone();
        with_active_task(Some(outer.clone()), move || {
            let inner = LowLevelTask::new("inner", Priority::Inherit, TaskFlags::NONE, Box::new(|_| None));
            *inner_priority2.lock().unwrap() = Some(inner.priority());
            inner.0.try_execute();
        });
        assert_eq!(*inner_priority.lock().unwrap(), Some(TaskPriority::HighBackground));
        outer.0.try_execute();
    }

    #[test]
    fn wait_until_completed_parks_until_another_thread_executes_it() {
        let task = task_with(|_| None);
        let task2 = task.clone();
        let runner = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            task2.0.try_execute();
        });
        task.0.wait_until_completed();
        assert!(task.is_completed());
        runner.join().unwrap();
    }

    #[test]
    fn busy_waiting_task_wait_until_completed_also_observes_completion() {
        let task = LowLevelTask::new(
            "busy",
            Priority::Concrete(TaskPriority::NormalForeground),
            TaskFlags::ALLOW_BUSY_WAITING,
            Box::new(|_| None),
        );
        let task2 = task.clone();
        let runner = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            task2.0.try_execute();
        });
        task.0.wait_until_completed();
        assert!(task.is_completed());
        runner.join().unwrap();
    }
}
