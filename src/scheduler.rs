//! Polling scheduler: named recurring tasks driven by one repeating timer.
//!
//! Each tick walks the task set under the scheduler lock. A task whose stop
//! predicate holds is removed; a task that is idle and due is marked executing
//! and its work spawned; a task still executing from an earlier tick is
//! skipped. The timer starts with the first task and stops with the last.
//!
//! Work closures and stop predicates are called with the scheduler lock held,
//! so they must not call back into the scheduler synchronously. Do that inside
//! the returned future instead.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{SchedulerError, panic_message};

pub const DEFAULT_TICK: Duration = Duration::from_millis(500);

pub type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;
pub type StopPredicate = Arc<dyn Fn() -> bool + Send + Sync>;
type Work = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

struct Task {
    id: Uuid,
    name: String,
    interval: Duration,
    work: Work,
    stop_when: Option<StopPredicate>,
    executing: AtomicBool,
    last_run: Mutex<Option<Instant>>,
}

impl Task {
    fn is_due(&self, now: Instant) -> bool {
        if self.executing.load(Ordering::Acquire) {
            return false;
        }
        match *self.last_run.lock() {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    tick: Duration,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    tasks: Vec<Arc<Task>>,
    timer: Option<CancellationToken>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_TICK)
    }
}

impl Scheduler {
    pub fn new(tick: Duration) -> Self {
        Self { inner: Arc::new(SchedulerInner { tick, state: Mutex::new(State::default()) }) }
    }

    /// Registers a recurring task. Must be called inside a tokio runtime.
    ///
    /// `work` runs at most once per `interval` (rounded up to the tick) and
    /// never overlaps itself. The task is dropped on the first tick where
    /// `stop_when` returns true.
    pub fn add<W, Fut>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        work: W,
        stop_when: Option<StopPredicate>,
    ) -> TaskHandle
    where
        W: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let task = Arc::new(Task {
            id: Uuid::new_v4(),
            name: name.into(),
            interval,
            work: Arc::new(move || work().boxed()),
            stop_when,
            executing: AtomicBool::new(false),
            last_run: Mutex::new(None),
        });
        let handle = TaskHandle { id: task.id, name: task.name.clone(), scheduler: Arc::downgrade(&self.inner) };
        let mut state = self.inner.state.lock();
        debug!(task = %task.name, id = %task.id, ?interval, "task added");
        state.tasks.push(task);
        if state.timer.is_none() {
            state.timer = Some(self.inner.start_timer());
        }
        handle
    }

    /// Removes every task called `name`. Returns how many were removed.
    pub fn remove(&self, name: &str) -> usize {
        self.inner.remove_where(|t| t.name == name)
    }

    /// Removes every task and stops the timer.
    pub fn stop_all(&self) {
        self.inner.remove_where(|_| true);
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the repeating timer is live.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().timer.is_some()
    }

    /// True while the named task has an invocation in flight.
    pub fn is_executing(&self, name: &str) -> bool {
        self.inner
            .state
            .lock()
            .tasks
            .iter()
            .any(|t| t.name == name && t.executing.load(Ordering::Acquire))
    }
}

impl SchedulerInner {
    fn start_timer(self: &Arc<Self>) -> CancellationToken {
        let token = CancellationToken::new();
        let timer = token.clone();
        let weak = Arc::downgrade(self);
        let period = self.tick;
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = timer.cancelled() => break,
                    _ = ticks.tick() => {}
                }
                let Some(inner) = weak.upgrade() else { break };
                inner.tick(&timer);
            }
        });
        token
    }

    fn tick(&self, timer: &CancellationToken) {
        let mut state = self.state.lock();
        if timer.is_cancelled() {
            return;
        }
        state.tasks.retain(|task| {
            let stop = task.stop_when.as_ref().is_some_and(|p| p());
            if stop {
                debug!(task = %task.name, "stop condition met; task removed");
            }
            !stop
        });
        let now = Instant::now();
        for task in &state.tasks {
            if task.is_due(now) {
                launch(task.clone());
            }
        }
        if state.tasks.is_empty() {
            stop_timer(&mut state);
        }
    }

    fn remove_where(&self, pred: impl Fn(&Task) -> bool) -> usize {
        let mut state = self.state.lock();
        let before = state.tasks.len();
        state.tasks.retain(|t| !pred(t));
        let removed = before - state.tasks.len();
        if state.tasks.is_empty() {
            stop_timer(&mut state);
        }
        removed
    }
}

fn stop_timer(state: &mut State) {
    if let Some(timer) = state.timer.take() {
        timer.cancel();
        debug!("scheduler timer stopped");
    }
}

fn launch(task: Arc<Task>) {
    task.executing.store(true, Ordering::Release);
    let fut = (task.work)();
    tokio::spawn(async move {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                let err = SchedulerError { task: task.name.clone(), error };
                warn!(task = %task.name, "{err}");
            }
            Err(panic) => {
                warn!(task = %task.name, panic = %panic_message(panic.as_ref()), "scheduled task panicked");
            }
        }
        *task.last_run.lock() = Some(Instant::now());
        task.executing.store(false, Ordering::Release);
    });
}

/// Handle returned by [`Scheduler::add`].
#[derive(Clone, Debug)]
pub struct TaskHandle {
    id: Uuid,
    name: String,
    scheduler: Weak<SchedulerInner>,
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Removes the task. No tick launches it once this returns; an invocation
    /// already in flight is left to finish.
    pub fn stop(&self) {
        if let Some(inner) = self.scheduler.upgrade() {
            let id = self.id;
            inner.remove_where(|t| t.id == id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.scheduler
            .upgrade()
            .is_some_and(|inner| inner.state.lock().tasks.iter().any(|t| t.id == self.id))
    }
}
