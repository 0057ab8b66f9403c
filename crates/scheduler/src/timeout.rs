//! Per-attempt timeouts layered on top of any [`Task`].
//!
//! The scheduler never times attempts out on its own. Wrapping a task in
//! [`WithTimeout`] turns an attempt that overruns into a
//! [`TaskError::Timeout`], which then goes through the normal retry path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::retry::{whole_millis, RetryPolicy};
use crate::task::{Task, TaskContext, TaskError};

/// A task whose every attempt is bounded by `limit`.
pub struct WithTimeout<T> {
    inner: T,
    limit: Duration,
}

impl<T: Task> WithTimeout<T> {
    pub fn new(inner: T, limit: Duration) -> Self {
        Self { inner, limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[async_trait]
impl<T: Task> Task for WithTimeout<T> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn priority(&self) -> Option<i32> {
        self.inner.priority()
    }

    fn max_retries(&self) -> Option<u32> {
        self.inner.max_retries()
    }

    fn retry_policy(&self) -> Option<Arc<dyn RetryPolicy>> {
        self.inner.retry_policy()
    }

    async fn execute(&self, ctx: TaskContext) -> Result<(), TaskError> {
        let token = ctx.cancellation_token().clone();
        match tokio::time::timeout(self.limit, self.inner.execute(ctx)).await {
            Ok(result) => result,
            Err(_) => {
                // Let the abandoned work know it should stop.
                token.cancel();
                Err(TaskError::timeout(self.inner.id(), whole_millis(self.limit)))
            }
        }
    }

    fn cancel(&self) {
        self.inner.cancel();
    }
}

/// Adapters available on every [`Task`].
pub trait TaskExt: Task + Sized {
    fn with_timeout(self, limit: Duration) -> WithTimeout<Self> {
        WithTimeout::new(self, limit)
    }
}

impl<T: Task> TaskExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ListenerRegistry;
    use crate::task::ReportGate;
    use tokio_util::sync::CancellationToken;

    struct Sleeper {
        nap: Duration,
    }

    #[async_trait]
    impl Task for Sleeper {
        fn id(&self) -> &str {
            "sleeper"
        }

        fn priority(&self) -> Option<i32> {
            Some(7)
        }

        async fn execute(&self, _ctx: TaskContext) -> Result<(), TaskError> {
            tokio::time::sleep(self.nap).await;
            Ok(())
        }
    }

    fn ctx() -> (TaskContext, CancellationToken) {
        let token = CancellationToken::new();
        let ctx = TaskContext::new(
            Arc::from("sleeper"),
            0,
            token.clone(),
            ReportGate::default(),
            Arc::new(ListenerRegistry::new()),
        );
        (ctx, token)
    }

    #[tokio::test(start_paused = true)]
    async fn overrunning_attempt_times_out() {
        let task = Sleeper { nap: Duration::from_secs(5) }.with_timeout(Duration::from_millis(200));
        let (ctx, token) = ctx();

        let err = task.execute(ctx).await.unwrap_err();
        assert_eq!(err, TaskError::timeout("sleeper", 200));
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn fast_attempt_passes_through() {
        let task = Sleeper { nap: Duration::from_millis(10) }.with_timeout(Duration::from_secs(1));
        let (ctx, token) = ctx();

        task.execute(ctx).await.unwrap();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn metadata_is_forwarded() {
        let task = Sleeper { nap: Duration::ZERO }.with_timeout(Duration::from_secs(1));
        assert_eq!(task.id(), "sleeper");
        assert_eq!(task.priority(), Some(7));
        assert_eq!(task.max_retries(), None);
        assert_eq!(task.limit(), Duration::from_secs(1));
    }
}
