use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::task::{TaskContext, TaskError};

use super::coordinator::{Command, Coordinator, EntryKey, RunningEntry};

impl Coordinator {
    /// Run the entry's next attempt on its own tokio task.
    ///
    /// Each attempt gets a fresh child of the entry token, so an attempt that
    /// cancels its own token (a timeout, say) leaves later retries untouched.
    pub(super) fn spawn_attempt(&self, key: EntryKey, entry: &mut RunningEntry) {
        entry.attempt_token = entry.token.child_token();
        let task = Arc::clone(&entry.task.task);
        let task_id: Arc<str> = Arc::from(entry.task.id());
        let ctx = TaskContext::new(
            Arc::clone(&task_id),
            entry.attempts,
            entry.attempt_token.clone(),
            Arc::clone(&entry.gate),
            Arc::clone(&self.listeners),
        );
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            // A second task isolates panics in user code from the slot bookkeeping.
            let outcome = match tokio::spawn(async move { task.execute(ctx).await }).await {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    error!(task_id = %task_id, "task attempt panicked: {}", join_err);
                    Err(TaskError::execution(format!("task panicked: {join_err}")))
                }
            };
            let _ = tx.send(Command::AttemptFinished {
                key,
                outcome,
                elapsed: started.elapsed(),
            });
        });
    }

    /// Wait out the backoff, then ask for the next attempt. The timer is
    /// dropped silently if the entry is cancelled first.
    pub(super) fn spawn_retry_timer(&self, key: EntryKey, delay: Duration, token: CancellationToken) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(Command::RetryDue { key });
                }
                _ = token.cancelled() => {
                    debug!(key, "backoff interrupted by cancellation");
                }
            }
        });
    }
}
