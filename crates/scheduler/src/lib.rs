//! In-process async task scheduler.
//!
//! Tasks are admitted with [`Scheduler::enqueue`], run highest priority first
//! under a fixed concurrency bound, and retried with backoff when they fail.
//! Every state transition is published to progress listeners registered with
//! [`Scheduler::on_progress`]. Tasks that exhaust their retries land in a
//! failed list that can be inspected or reprocessed.
//!
//! A task keeps its slot while it waits out a backoff, so a burst of failing
//! tasks can hold every slot idle until their retries come due.

pub mod config;
pub mod error;
pub mod metrics;
pub mod progress;
pub mod retry;
pub mod runner;
pub mod task;
pub mod timeout;

pub use config::{BackoffConfig, SchedulerConfig};
pub use error::SchedulerError;
pub use metrics::SchedulerMetrics;
pub use progress::{ProgressEvent, ProgressListener, Subscription, TaskStatus};
pub use retry::{ExponentialBackoff, FixedDelay, RetryPolicy};
pub use runner::{FailedTask, Scheduler, SchedulerBuilder};
pub use task::{ProgressReporter, Task, TaskContext, TaskError};
pub use timeout::{TaskExt, WithTimeout};

pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
