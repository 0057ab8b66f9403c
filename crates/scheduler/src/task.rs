//! The unit-of-work contract callers implement, and the context handed to
//! each execution attempt.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::progress::{ListenerRegistry, ProgressEvent, TaskStatus};
use crate::retry::RetryPolicy;

/// Error returned by a failed attempt.
///
/// The scheduler treats the contents as opaque; they are carried verbatim in
/// progress events and the failed-task list.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    #[error("{message}")]
    Execution {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<serde_json::Value>,
    },

    #[error("task '{task_id}' timed out after {timeout_ms}ms")]
    Timeout { task_id: String, timeout_ms: u64 },
}

impl TaskError {
    pub fn execution(message: impl Into<String>) -> Self {
        TaskError::Execution {
            message: message.into(),
            context: None,
        }
    }

    pub fn timeout(task_id: impl Into<String>, timeout_ms: u64) -> Self {
        TaskError::Timeout {
            task_id: task_id.into(),
            timeout_ms,
        }
    }

    /// Attach structured context to an execution error. Timeout errors
    /// already carry their own fields and are returned unchanged.
    pub fn with_context(self, value: serde_json::Value) -> Self {
        match self {
            TaskError::Execution { message, .. } => TaskError::Execution {
                message,
                context: Some(value),
            },
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout { .. })
    }
}

/// A unit of asynchronous work the scheduler can run.
///
/// Only [`Task::id`] and [`Task::execute`] are required. The remaining
/// methods return `None` to inherit the scheduler's defaults.
///
/// `execute` may be called several times for the same task when earlier
/// attempts fail; making repeated runs safe is up to the implementation.
#[async_trait]
pub trait Task: Send + Sync {
    /// Identifier used in progress events. Not required to be unique.
    fn id(&self) -> &str;

    /// Higher runs first. Defaults to 0.
    fn priority(&self) -> Option<i32> {
        None
    }

    fn max_retries(&self) -> Option<u32> {
        None
    }

    fn retry_policy(&self) -> Option<Arc<dyn RetryPolicy>> {
        None
    }

    /// Run one attempt.
    async fn execute(&self, ctx: TaskContext) -> Result<(), TaskError>;

    /// Ask an in-flight attempt to stop. Advisory: the attempt's
    /// [`TaskContext::cancellation_token`] is cancelled as well, and the
    /// scheduler releases the slot whether or not the work actually stops.
    fn cancel(&self) {}
}

/// Serializes progress reports of one slot occupant against the scheduler
/// closing its attempts. Reporters hold the read side while publishing.
pub(crate) type ReportGate = Arc<RwLock<()>>;

/// Per-attempt handle passed to [`Task::execute`].
#[derive(Clone)]
pub struct TaskContext {
    task_id: Arc<str>,
    attempt: u32,
    token: CancellationToken,
    reporter: ProgressReporter,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: Arc<str>,
        attempt: u32,
        token: CancellationToken,
        gate: ReportGate,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        let reporter = ProgressReporter {
            task_id: task_id.clone(),
            token: token.clone(),
            gate,
            listeners,
        };
        Self {
            task_id,
            attempt,
            token,
            reporter,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Zero-based attempt number; 0 on the first run, 1 on the first retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once this attempt is over: cancelled, timed out, or already
    /// reported as finished by the scheduler.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    /// Shorthand for `ctx.reporter().report(progress)`.
    pub fn report(&self, progress: f64) {
        self.reporter.report(progress);
    }
}

/// Publishes fine-grained RUNNING progress for one attempt.
///
/// Reports made once the attempt is over are dropped, so nothing follows a
/// failed attempt's event or the task's COMPLETED, FAILED or CANCELLED event.
/// This holds for reporters that outlive `execute`.
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: Arc<str>,
    token: CancellationToken,
    gate: ReportGate,
    listeners: Arc<ListenerRegistry>,
}

impl ProgressReporter {
    pub fn report(&self, progress: f64) {
        self.publish(ProgressEvent::new(&*self.task_id, progress, TaskStatus::Running));
    }

    pub fn report_with_error(&self, progress: f64, error: TaskError) {
        self.publish(
            ProgressEvent::new(&*self.task_id, progress, TaskStatus::Running).with_error(error),
        );
    }

    fn publish(&self, event: ProgressEvent) {
        let _open = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if self.token.is_cancelled() {
            return;
        }
        self.listeners.broadcast(&event);
    }
}
