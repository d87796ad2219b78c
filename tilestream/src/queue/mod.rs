//! Chunked cooperative task queue.
//!
//! Long-running CPU work (buffer building) is split into increments small
//! enough to interleave with everything else on the runtime. One scheduling
//! turn runs exactly one increment of the most urgent task, then yields the
//! thread; tasks re-enter the queue until they report completion.
//!
//! Ordering follows each task's current priority (lower values run sooner),
//! with enqueue order breaking ties. Priorities are re-read on
//! [`TaskQueue::sort_tasks`] so a pan or zoom reorders pending work without
//! touching the tasks themselves. Cancelled tasks are discarded lazily at
//! the queue head; their remaining increments never execute.
//!
//! # Example
//!
//! ```ignore
//! use tilestream::queue::{ChunkedTask, TaskQueue};
//!
//! let queue = Arc::new(TaskQueue::new());
//! let runner = queue.spawn_runner(&runtime, shutdown.clone());
//!
//! let id = queue.enqueue(Box::new(build_task));
//! // later, if the tile became irrelevant:
//! queue.cancel(id);
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identifier for a task on the queue.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskId(pub(crate) u64);

/// Outcome of one scheduling increment.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IncrementOutcome {
    /// More increments remain; the task re-enters the queue.
    Pending,
    /// The task finished and leaves the queue.
    Finished,
}

/// A unit of work the queue advances one increment at a time.
///
/// Increments should stay in the low-millisecond range; the queue yields
/// the thread between them.
pub trait ChunkedTask: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Current scheduling priority; lower values run sooner.
    fn priority(&self) -> f32;

    /// Runs one increment.
    fn run_increment(&mut self) -> IncrementOutcome;
}

struct QueuedTask {
    id: TaskId,
    /// Priority cached at enqueue, reinsertion, or the last sort.
    priority: f32,
    task: Box<dyn ChunkedTask>,
}

#[derive(Default)]
struct QueueState {
    /// Sorted ascending by `(priority, id)`.
    tasks: Vec<QueuedTask>,
    canceled: HashSet<TaskId>,
    /// Task currently out of the queue executing an increment.
    running: Option<TaskId>,
}

impl QueueState {
    fn insert_sorted(&mut self, entry: QueuedTask) {
        let at = self.tasks.partition_point(|other| {
            match other.priority.total_cmp(&entry.priority) {
                CmpOrdering::Less => true,
                CmpOrdering::Equal => other.id.0 < entry.id.0,
                CmpOrdering::Greater => false,
            }
        });
        self.tasks.insert(at, entry);
    }
}

/// Cooperative scheduler shared by all sources.
///
/// The queue itself is synchronous; [`TaskQueue::run_turn`] can be driven
/// directly, and [`TaskQueue::spawn_runner`] starts the usual background
/// loop of turn-then-yield.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    next_id: AtomicU64,
    wake: Notify,
    turns: AtomicU64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            next_id: AtomicU64::new(0),
            wake: Notify::new(),
            turns: AtomicU64::new(0),
        }
    }

    /// Adds a task and wakes the runner.
    pub fn enqueue(&self, task: Box<dyn ChunkedTask>) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let priority = task.priority();
        {
            let mut state = self.state.lock();
            state.insert_sorted(QueuedTask { id, priority, task });
        }
        self.wake.notify_one();
        id
    }

    /// Marks a task cancelled; its remaining increments are never run.
    ///
    /// Unknown or already finished ids are ignored.
    pub fn cancel(&self, id: TaskId) {
        let mut state = self.state.lock();
        let live = state.running == Some(id) || state.tasks.iter().any(|entry| entry.id == id);
        if live {
            state.canceled.insert(id);
        }
    }

    /// Re-reads every task's priority and restores the queue order.
    pub fn sort_tasks(&self) {
        let mut state = self.state.lock();
        for entry in &mut state.tasks {
            entry.priority = entry.task.priority();
        }
        state
            .tasks
            .sort_by(|a, b| a.priority.total_cmp(&b.priority).then(a.id.0.cmp(&b.id.0)));
    }

    /// Number of queued tasks, not counting one mid-increment.
    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().tasks.is_empty()
    }

    /// Total increments executed so far.
    pub fn turns(&self) -> u64 {
        self.turns.load(Ordering::Relaxed)
    }

    /// Runs one scheduling turn: discard cancelled tasks at the head, then
    /// execute one increment of the most urgent task.
    ///
    /// The increment runs without holding the queue lock. Returns false when
    /// the queue had nothing to run.
    pub fn run_turn(&self) -> bool {
        let mut entry = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            while let Some(front) = state.tasks.first() {
                if state.canceled.remove(&front.id) {
                    let dropped = state.tasks.remove(0);
                    debug!(task = dropped.task.name(), id = dropped.id.0, "dropped cancelled task");
                } else {
                    break;
                }
            }
            if state.tasks.is_empty() {
                return false;
            }
            let entry = state.tasks.remove(0);
            state.running = Some(entry.id);
            entry
        };

        let outcome = entry.task.run_increment();
        self.turns.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        state.running = None;
        let canceled = state.canceled.remove(&entry.id);
        match outcome {
            IncrementOutcome::Finished => {
                debug!(task = entry.task.name(), id = entry.id.0, "task finished");
            }
            IncrementOutcome::Pending if canceled => {
                debug!(task = entry.task.name(), id = entry.id.0, "dropped cancelled task");
            }
            IncrementOutcome::Pending => {
                entry.priority = entry.task.priority();
                state.insert_sorted(entry);
            }
        }
        true
    }

    /// Starts the background loop driving [`TaskQueue::run_turn`].
    ///
    /// Each turn is followed by a yield so decode completions and timers
    /// interleave with build work; an empty queue parks until the next
    /// enqueue. The loop exits when `shutdown` fires.
    pub fn spawn_runner(
        self: &Arc<Self>,
        runtime: &Handle,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        runtime.spawn(async move {
            debug!("task queue runner started");
            loop {
                if shutdown.is_cancelled() {
                    break;
                }
                if queue.run_turn() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = queue.wake.notified() => {}
                    }
                }
            }
            debug!("task queue runner stopped");
        })
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.len())
            .field("turns", &self.turns())
            .finish()
    }
}
