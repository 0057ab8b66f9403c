use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::metrics::SchedulerMetrics;
use crate::progress::{ListenerRegistry, ProgressEvent, Subscription};
use crate::retry::RetryPolicy;
use crate::task::{Task, TaskError};

use super::coordinator::{Command, Coordinator};

/// A task that exhausted its retries, kept for inspection or reprocessing.
#[derive(Clone)]
pub struct FailedTask {
    pub task: Arc<dyn Task>,
    /// Error of the last attempt.
    pub error: TaskError,
    /// Attempts made, including the first.
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl FailedTask {
    pub fn id(&self) -> &str {
        self.task.id()
    }
}

impl fmt::Debug for FailedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailedTask")
            .field("id", &self.id())
            .field("error", &self.error)
            .field("attempts", &self.attempts)
            .field("failed_at", &self.failed_at)
            .finish()
    }
}

/// State shared by every clone of a [`Scheduler`] handle.
struct Shared {
    tx: mpsc::UnboundedSender<Command>,
    listeners: Arc<ListenerRegistry>,
    concurrency: usize,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

/// Handle to a running scheduler.
///
/// Cheap to clone. The coordinator behind it keeps going until the last
/// handle is dropped and all admitted work has reached a terminal state.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Start a scheduler from validated config. Must be called from within a
    /// tokio runtime.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        SchedulerBuilder::from_config(config).build()
    }

    /// Start configuring a scheduler with the given slot count.
    pub fn builder(concurrency: usize) -> SchedulerBuilder {
        SchedulerBuilder::from_config(SchedulerConfig::with_concurrency(concurrency))
    }

    pub fn concurrency(&self) -> usize {
        self.shared.concurrency
    }

    /// Admit a task. It starts right away if a slot is free.
    pub fn enqueue<T: Task + 'static>(&self, task: T) -> Result<(), SchedulerError> {
        self.enqueue_arc(Arc::new(task))
    }

    pub fn enqueue_arc(&self, task: Arc<dyn Task>) -> Result<(), SchedulerError> {
        self.send(Command::Enqueue(task))
    }

    /// Register a progress listener. Events are delivered synchronously, in
    /// registration order, on the thread that produced them.
    ///
    /// Dropping the returned [`Subscription`] does not unregister; call
    /// [`Subscription::unsubscribe`].
    pub fn on_progress<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(Arc::new(listener))
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    /// Snapshot of the failed list, oldest first.
    pub async fn failed_tasks(&self) -> Result<Vec<FailedTask>, SchedulerError> {
        self.request(Command::FailedTasks).await
    }

    /// Move every failed task back into the pending queue with a fresh
    /// attempt count. Returns how many were moved.
    pub async fn reprocess_failed_tasks(&self) -> Result<usize, SchedulerError> {
        self.request(Command::ReprocessFailed).await
    }

    /// Drop all pending tasks. With `cancel_running`, also cancel every task
    /// holding a slot, including those waiting out a backoff.
    pub async fn clear_queue(&self, cancel_running: bool) -> Result<(), SchedulerError> {
        self.request(|done| Command::ClearQueue {
            cancel_running,
            done,
        })
        .await
    }

    /// Same as `clear_queue(true)`.
    pub async fn cancel_all(&self) -> Result<(), SchedulerError> {
        self.clear_queue(true).await
    }

    /// Resolve once nothing is pending or running. Returns immediately when
    /// the scheduler is already idle.
    ///
    /// Failed tasks do not hold this up: they are out of the way once they
    /// land in the failed list.
    pub async fn wait_for_completion(&self) -> Result<(), SchedulerError> {
        self.request(Command::WaitIdle).await
    }

    pub async fn metrics(&self) -> Result<SchedulerMetrics, SchedulerError> {
        self.request(Command::Metrics).await
    }

    fn send(&self, cmd: Command) -> Result<(), SchedulerError> {
        self.shared.tx.send(cmd).map_err(|_| SchedulerError::Closed)
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply))?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }
}

/// Fluent builder for [`Scheduler`].
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
}

impl SchedulerBuilder {
    pub fn from_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            retry_policy: None,
        }
    }

    /// Retries for tasks that do not set their own.
    pub fn default_max_retries(mut self, retries: u32) -> Self {
        self.config.default_max_retries = retries;
        self
    }

    /// Backoff for tasks that do not set their own. Replaces the
    /// exponential backoff described by the config.
    pub fn default_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Validate the config and spawn the coordinator on the current runtime.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let retry_policy = self
            .retry_policy
            .unwrap_or_else(|| self.config.retry_policy());
        let listeners = Arc::new(ListenerRegistry::new());
        let (tx, rx) = mpsc::unbounded_channel();

        let coordinator = Coordinator::new(
            self.config.concurrency,
            self.config.default_max_retries,
            retry_policy,
            Arc::clone(&listeners),
            tx.clone(),
            rx,
        );
        runtime.spawn(coordinator.run());

        info!(
            concurrency = self.config.concurrency,
            default_max_retries = self.config.default_max_retries,
            "scheduler started"
        );

        Ok(Scheduler {
            shared: Arc::new(Shared {
                tx,
                listeners,
                concurrency: self.config.concurrency,
            }),
        })
    }
}
