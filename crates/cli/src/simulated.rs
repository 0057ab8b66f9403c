//! Simulated jobs for the demo workload.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use tasklane_scheduler::{Task, TaskContext, TaskError};

const STEPS: u32 = 5;

/// How a simulated job behaves across attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    /// Fail this many attempts, then succeed.
    Flaky(u32),
    AlwaysFail,
}

pub struct SimulatedJob {
    id: String,
    priority: i32,
    work: Duration,
    outcome: Outcome,
    runs: AtomicU32,
}

impl SimulatedJob {
    pub fn new(kind: &str, priority: i32, work: Duration, outcome: Outcome) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{kind}-{}", &suffix[..8]),
            priority,
            work,
            outcome,
            runs: AtomicU32::new(0),
        }
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }
}

/// Build the `index`-th job of a demo batch. Every third job is flaky and
/// every seventh fails for good.
pub fn job_for(index: usize, work: Duration, flaky_attempts: u32) -> SimulatedJob {
    let priority = (index % 3) as i32;
    if index % 7 == 6 {
        SimulatedJob::new("doomed", priority, work, Outcome::AlwaysFail)
    } else if index % 3 == 2 {
        SimulatedJob::new("flaky", priority, work, Outcome::Flaky(flaky_attempts))
    } else {
        SimulatedJob::new("steady", priority, work, Outcome::Succeed)
    }
}

#[async_trait]
impl Task for SimulatedJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> Option<i32> {
        Some(self.priority)
    }

    async fn execute(&self, ctx: TaskContext) -> Result<(), TaskError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        let step = self.work / STEPS;

        for i in 1..=STEPS {
            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                _ = ctx.cancelled() => {
                    return Err(TaskError::execution("interrupted"));
                }
            }
            ctx.report(f64::from(i) * 100.0 / f64::from(STEPS));
        }

        let failed = match self.outcome {
            Outcome::Succeed => false,
            Outcome::Flaky(n) => run < n,
            Outcome::AlwaysFail => true,
        };
        if failed {
            Err(TaskError::execution("simulated failure").with_context(json!({ "run": run })))
        } else {
            Ok(())
        }
    }
}
