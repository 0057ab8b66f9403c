use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::{self, Write};

use tasklane_scheduler::{FailedTask, ProgressEvent, SchedulerMetrics, TaskStatus};

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const RUNNING: Color = Color::Cyan;
    const RETRY: Color = Color::Yellow;
    const COMPLETED: Color = Color::Green;
    const FAILED: Color = Color::Red;
    const CANCELLED: Color = Color::Magenta;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

/// Renders scheduler activity either as coloured text or JSON lines.
pub struct Terminal {
    json: bool,
}

impl Terminal {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Print the startup banner. Suppressed in JSON mode.
    pub fn print_banner(&self, concurrency: usize, tasks: usize) -> Result<()> {
        if self.json {
            return Ok(());
        }
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print("tasklane"),
            ResetColor,
            Print(" - scheduler demo\n"),
            SetForegroundColor(Colors::DIM),
            Print(format!("Slots: {} | Jobs: {}\n", concurrency, tasks)),
            Print("Ctrl+C cancels everything still queued or running.\n"),
            Print("---\n"),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Display one progress event.
    pub fn display_event(&self, event: &ProgressEvent) -> Result<()> {
        let mut stdout = io::stdout();
        if self.json {
            writeln!(stdout, "{}", serde_json::to_string(event)?)?;
            return Ok(());
        }

        let (color, label) = match (event.status, &event.error) {
            (TaskStatus::Running, Some(_)) => (Colors::RETRY, "retry"),
            (TaskStatus::Running, None) => (Colors::RUNNING, "run"),
            (TaskStatus::Completed, _) => (Colors::COMPLETED, "done"),
            (TaskStatus::Failed, _) => (Colors::FAILED, "failed"),
            (TaskStatus::Cancelled, _) => (Colors::CANCELLED, "cancelled"),
            (TaskStatus::Pending, _) => (Colors::DIM, "pending"),
        };
        let detail = match &event.error {
            Some(err) => format!(" ({})", err),
            None => String::new(),
        };

        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("{} ", event.timestamp.format("%H:%M:%S%.3f"))),
            SetForegroundColor(color),
            Print(format!("[{:<9}] ", label)),
            ResetColor,
            Print(format!("{:<16} {:>5.1}%{}\n", event.task_id, event.progress, detail)),
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Print the end-of-run summary.
    pub fn print_summary(&self, metrics: &SchedulerMetrics, failed: &[FailedTask]) -> Result<()> {
        let mut stdout = io::stdout();
        if self.json {
            let summary = serde_json::json!({
                "metrics": metrics,
                "failed": failed
                    .iter()
                    .map(|f| serde_json::json!({
                        "taskId": f.id(),
                        "attempts": f.attempts,
                        "error": f.error,
                        "failedAt": f.failed_at,
                    }))
                    .collect::<Vec<_>>(),
            });
            writeln!(stdout, "{}", summary)?;
            return Ok(());
        }

        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print("---\nSummary\n"),
            ResetColor,
            Print(format!(
                "completed {} | failed {} | cancelled {} | retries {}\n",
                metrics.tasks_completed,
                metrics.tasks_failed,
                metrics.tasks_cancelled,
                metrics.retries_scheduled,
            )),
        )?;

        for f in failed {
            execute!(
                stdout,
                SetForegroundColor(Colors::FAILED),
                Print(format!(
                    "  {} after {} attempt(s): {}\n",
                    f.id(),
                    f.attempts,
                    f.error
                )),
                ResetColor,
            )?;
        }

        stdout.flush()?;
        Ok(())
    }

    /// Print an info message.
    pub fn print_info(&self, msg: &str) -> Result<()> {
        if self.json {
            return Ok(());
        }
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("{}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }
}
