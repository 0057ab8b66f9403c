//! Scheduler error types.

use thiserror::Error;

/// Errors raised by the scheduler itself (never by the tasks it runs).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid scheduler config: {0}")]
    InvalidConfig(String),

    #[error("scheduler coordinator has shut down")]
    Closed,

    #[error("scheduler must be created inside a tokio runtime")]
    NoRuntime,

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}
