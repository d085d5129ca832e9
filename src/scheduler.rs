//! Cancellable delayed tasks.
//!
//! The deletion coordinator never talks to a timer directly; it asks a
//! [`Scheduler`] for a task and keeps the returned [`TaskHandle`]. Production
//! code uses [`TokioScheduler`]; tests drive [`ManualScheduler`] as a fake clock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::trace;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to one scheduled task. Cancelling is idempotent.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TaskHandle {
    fn new(abort: Option<AbortHandle>) -> Self {
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            cancelled: Arc::new(AtomicBool::new(false)),
            abort,
        }
    }

    pub fn id(&self) -> u64 { self.id }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(a) = &self.abort {
            a.abort();
        }
        trace!(task = self.id, "task cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub trait Scheduler: Send + Sync {
    /// Runs `task` once after `delay` unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;
}

// ---------------- Tokio ----------------

pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self { Self { handle } }

    /// Uses the runtime the caller is running on.
    pub fn try_current() -> Result<Self, tokio::runtime::TryCurrentError> {
        Handle::try_current().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                task();
            }
        });
        let mut handle = TaskHandle::new(Some(join.abort_handle()));
        handle.cancelled = cancelled;
        handle
    }
}

// ---------------- Manual (fake clock) ----------------

struct Pending {
    due: Duration,
    handle: TaskHandle,
    task: Task,
}

/// Fake clock: tasks only run when [`ManualScheduler::advance`] moves time past them.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    pending: Vec<Pending>,
}

impl ManualScheduler {
    pub fn new() -> Self { Self::default() }

    pub fn now(&self) -> Duration {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).now
    }

    /// Tasks scheduled and neither fired nor cancelled.
    pub fn pending(&self) -> usize {
        let s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        s.pending.iter().filter(|p| !p.handle.is_cancelled()).count()
    }

    /// Moves the clock forward and runs every due task in due order.
    /// Tasks run without the scheduler lock held, so they may schedule more work.
    pub fn advance(&self, by: Duration) {
        let due: Vec<Pending> = {
            let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            s.now += by;
            let now = s.now;
            let (mut ready, rest): (Vec<_>, Vec<_>) = s.pending.drain(..).partition(|p| p.due <= now);
            s.pending = rest;
            ready.sort_by_key(|p| p.due);
            ready
        };
        for p in due {
            if p.handle.is_cancelled() {
                continue;
            }
            trace!(task = p.handle.id(), "manual task fired");
            (p.task)();
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new(None);
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let due = s.now + delay;
        s.pending.push(Pending { due, handle: handle.clone(), task });
        handle
    }
}
