use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::SchedulerMetrics;
use crate::progress::{ListenerRegistry, ProgressEvent};
use crate::retry::{whole_millis, RetryPolicy};
use crate::task::{ReportGate, Task, TaskError};

use super::core::FailedTask;
use super::queue::{PendingQueue, QueuedTask};

/// Internal identity of a slot occupant. Task ids may repeat; keys never do.
pub(crate) type EntryKey = u64;

/// Messages applied, in order, by the coordinator.
pub(crate) enum Command {
    Enqueue(Arc<dyn Task>),
    AttemptFinished {
        key: EntryKey,
        outcome: Result<(), TaskError>,
        elapsed: Duration,
    },
    RetryDue {
        key: EntryKey,
    },
    FailedTasks(oneshot::Sender<Vec<FailedTask>>),
    ReprocessFailed(oneshot::Sender<usize>),
    ClearQueue {
        cancel_running: bool,
        done: oneshot::Sender<()>,
    },
    WaitIdle(oneshot::Sender<()>),
    Metrics(oneshot::Sender<SchedulerMetrics>),
    /// Sent when the last `Scheduler` handle is dropped.
    Shutdown,
}

/// A task occupying a slot, from its first attempt until a terminal
/// transition, including any backoff wait in between.
pub(crate) struct RunningEntry {
    pub task: QueuedTask,
    pub attempts: u32,
    /// Parent of every attempt's token; cancelling it also stops the
    /// backoff timer.
    pub token: CancellationToken,
    /// Token handed to the attempt in flight, a child of `token`.
    pub attempt_token: CancellationToken,
    pub gate: ReportGate,
}

impl RunningEntry {
    fn new(task: QueuedTask) -> Self {
        let token = CancellationToken::new();
        Self {
            task,
            attempts: 0,
            attempt_token: token.child_token(),
            token,
            gate: ReportGate::default(),
        }
    }

    /// Silence the current attempt's reporters. Once this returns, no report
    /// from that attempt can reach listeners.
    fn close_attempt(&self) {
        let _closed = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        self.attempt_token.cancel();
    }

    /// Silence every reporter of this occupant and stop its backoff timer.
    fn close(&self) {
        let _closed = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        self.token.cancel();
    }
}

/// Run a user-supplied hook, turning a panic into an error message.
fn guarded<R>(hook: &str, task_id: &str, f: impl FnOnce() -> R) -> Result<R, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        warn!(task_id = %task_id, hook, panic = %message, "task hook panicked");
        message
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Sole owner of the pending queue, the running set and the failed list.
///
/// Attempts and backoff timers run as separate tokio tasks and report back
/// through `Command`s; only the coordinator mutates scheduler state.
pub(crate) struct Coordinator {
    concurrency: usize,
    default_max_retries: u32,
    default_retry_policy: Arc<dyn RetryPolicy>,
    pending: PendingQueue,
    running: BTreeMap<EntryKey, RunningEntry>,
    failed: Vec<FailedTask>,
    idle_waiters: Vec<oneshot::Sender<()>>,
    pub(super) listeners: Arc<ListenerRegistry>,
    metrics: SchedulerMetrics,
    next_seq: u64,
    next_key: EntryKey,
    shutting_down: bool,
    pub(super) tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl Coordinator {
    pub fn new(
        concurrency: usize,
        default_max_retries: u32,
        default_retry_policy: Arc<dyn RetryPolicy>,
        listeners: Arc<ListenerRegistry>,
        tx: mpsc::UnboundedSender<Command>,
        rx: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let mut metrics = SchedulerMetrics::default();
        metrics.concurrency = concurrency;
        Self {
            concurrency,
            default_max_retries,
            default_retry_policy,
            pending: PendingQueue::default(),
            running: BTreeMap::new(),
            failed: Vec::new(),
            idle_waiters: Vec::new(),
            listeners,
            metrics,
            next_seq: 0,
            next_key: 0,
            shutting_down: false,
            tx,
            rx,
        }
    }

    /// Apply commands until every handle is gone and the scheduler is idle.
    ///
    /// Work that is already queued when the last handle drops still runs to
    /// a terminal state; listeners keep receiving its events.
    pub async fn run(mut self) {
        debug!(concurrency = self.concurrency, "scheduler coordinator started");
        while let Some(cmd) = self.rx.recv().await {
            self.handle(cmd);
            if self.shutting_down && self.is_idle() {
                break;
            }
        }
        info!("scheduler coordinator stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Enqueue(task) => {
                self.admit(task);
                self.fill_slots();
            }
            Command::AttemptFinished { key, outcome, elapsed } => {
                self.on_attempt_finished(key, outcome, elapsed);
            }
            Command::RetryDue { key } => self.on_retry_due(key),
            Command::FailedTasks(reply) => {
                let _ = reply.send(self.failed.clone());
            }
            Command::ReprocessFailed(reply) => {
                let failed = std::mem::take(&mut self.failed);
                let count = failed.len();
                for record in failed {
                    self.admit(record.task);
                }
                if count > 0 {
                    info!(count, "re-enqueued failed tasks");
                }
                self.fill_slots();
                let _ = reply.send(count);
            }
            Command::ClearQueue { cancel_running, done } => {
                let dropped = self.pending.clear();
                if dropped > 0 {
                    info!(dropped, "cleared pending queue");
                }
                if cancel_running {
                    self.cancel_running();
                }
                let _ = done.send(());
            }
            Command::WaitIdle(reply) => {
                if self.is_idle() {
                    let _ = reply.send(());
                } else {
                    self.idle_waiters.push(reply);
                }
            }
            Command::Metrics(reply) => {
                let _ = reply.send(self.snapshot_metrics());
            }
            Command::Shutdown => {
                debug!(
                    pending = self.pending.len(),
                    running = self.running.len(),
                    "last scheduler handle dropped; draining"
                );
                self.shutting_down = true;
            }
        }

        self.notify_if_idle();
    }

    // ── Admission & selection ──────────────────────────────────────

    /// Queue a task. A hook that panics is treated as unset.
    fn admit(&mut self, task: Arc<dyn Task>) {
        let id = task.id();
        let priority = guarded("priority", id, || task.priority()).ok().flatten();
        let max_retries = guarded("max_retries", id, || task.max_retries()).ok().flatten();
        let retry_policy = guarded("retry_policy", id, || task.retry_policy()).ok().flatten();

        let queued = QueuedTask {
            priority: priority.unwrap_or(0),
            max_retries: max_retries.unwrap_or(self.default_max_retries),
            retry_policy: retry_policy.unwrap_or_else(|| Arc::clone(&self.default_retry_policy)),
            seq: self.next_seq,
            task,
        };
        self.next_seq += 1;
        self.metrics.tasks_enqueued += 1;
        debug!(
            task_id = %queued.id(),
            priority = queued.priority,
            max_retries = queued.max_retries,
            "task enqueued"
        );
        self.pending.push(queued);
    }

    /// Start pending tasks until every slot is taken or nothing is left.
    fn fill_slots(&mut self) {
        while self.running.len() < self.concurrency {
            let Some(task) = self.pending.pop() else {
                break;
            };
            self.start(task);
        }
    }

    fn start(&mut self, task: QueuedTask) {
        let key = self.next_key;
        self.next_key += 1;

        debug!(task_id = %task.id(), priority = task.priority, "task selected");
        self.listeners.broadcast(&ProgressEvent::started(task.id()));

        let mut entry = RunningEntry::new(task);
        self.spawn_attempt(key, &mut entry);
        self.running.insert(key, entry);
    }

    // ── Retry state machine ────────────────────────────────────────

    fn on_attempt_finished(
        &mut self,
        key: EntryKey,
        outcome: Result<(), TaskError>,
        elapsed: Duration,
    ) {
        let Some(entry) = self.running.get(&key) else {
            // Cancelled while the attempt was still running.
            debug!(key, "ignoring outcome of a released slot");
            return;
        };

        match outcome {
            Ok(()) => {
                let Some(entry) = self.running.remove(&key) else {
                    return;
                };
                entry.close();
                let id = entry.task.id();
                info!(task_id = %id, attempts = entry.attempts + 1, ?elapsed, "task completed");
                self.metrics.record_completion(elapsed);
                self.listeners.broadcast(&ProgressEvent::completed(id));
                self.fill_slots();
            }
            Err(err) => {
                // Every failed attempt is visible as RUNNING-with-error; only
                // exhaustion flips the status to FAILED.
                entry.close_attempt();
                self.listeners
                    .broadcast(&ProgressEvent::attempt_failed(entry.task.id(), err.clone()));

                if entry.attempts >= entry.task.max_retries {
                    self.exhaust(key, err);
                    self.fill_slots();
                    return;
                }

                let policy = Arc::clone(&entry.task.retry_policy);
                let attempt = entry.attempts;
                match guarded("retry_policy.delay", entry.task.id(), || policy.delay(attempt)) {
                    Ok(delay) => {
                        warn!(
                            task_id = %entry.task.id(),
                            attempt,
                            max_retries = entry.task.max_retries,
                            delay_ms = whole_millis(delay),
                            error = %err,
                            "task attempt failed; retry scheduled"
                        );
                        self.metrics.retries_scheduled += 1;
                        self.spawn_retry_timer(key, delay, entry.token.clone());
                    }
                    Err(message) => {
                        let err = TaskError::execution(format!("retry policy panicked: {message}"))
                            .with_context(serde_json::json!({ "attempt_error": err.to_string() }));
                        self.exhaust(key, err);
                        self.fill_slots();
                    }
                }
            }
        }
    }

    fn on_retry_due(&mut self, key: EntryKey) {
        let Some(mut entry) = self.running.remove(&key) else {
            return;
        };
        entry.attempts += 1;
        debug!(task_id = %entry.task.id(), attempt = entry.attempts, "retrying task");
        self.spawn_attempt(key, &mut entry);
        self.running.insert(key, entry);
    }

    fn exhaust(&mut self, key: EntryKey, err: TaskError) {
        let Some(entry) = self.running.remove(&key) else {
            return;
        };
        entry.close();
        let id = entry.task.id();
        error!(
            task_id = %id,
            attempts = entry.attempts + 1,
            error = %err,
            "task failed; retries exhausted"
        );
        self.metrics.tasks_failed += 1;
        self.listeners
            .broadcast(&ProgressEvent::failed(id, err.clone()));
        self.failed.push(FailedTask {
            task: entry.task.task,
            error: err,
            attempts: entry.attempts + 1,
            failed_at: Utc::now(),
        });
    }

    // ── Cancellation ───────────────────────────────────────────────

    /// Signal every slot occupant to stop, report it CANCELLED and release
    /// its slot. Occupants whose work ignores the signal keep running in the
    /// background; their eventual outcome is discarded.
    fn cancel_running(&mut self) {
        let running = std::mem::take(&mut self.running);
        for (_, entry) in running {
            let id = entry.task.id();
            entry.close();

            let task = Arc::clone(&entry.task.task);
            let _ = guarded("cancel", id, || task.cancel());

            info!(task_id = %id, attempt = entry.attempts, "task cancelled");
            self.metrics.tasks_cancelled += 1;
            self.listeners.broadcast(&ProgressEvent::cancelled(id));
        }
    }

    // ── Idle tracking ──────────────────────────────────────────────

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }

    fn notify_if_idle(&mut self) {
        if !self.is_idle() || self.idle_waiters.is_empty() {
            return;
        }
        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn snapshot_metrics(&self) -> SchedulerMetrics {
        let mut metrics = self.metrics.clone();
        metrics.pending = self.pending.len();
        metrics.running = self.running.len();
        metrics.failed = self.failed.len();
        metrics
    }
}
