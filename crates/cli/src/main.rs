mod cli;
mod config;
mod simulated;
mod terminal;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use tasklane_scheduler::Scheduler;

use crate::cli::CliArgs;
use crate::config::CliConfig;
use crate::simulated::job_for;
use crate::terminal::Terminal;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let terminal = Arc::new(Terminal::new(args.json));

    // Load config, then let flags win
    let mut config = CliConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(concurrency) = args.concurrency {
        config.scheduler.concurrency = concurrency;
    }
    if let Some(retries) = args.max_retries {
        config.scheduler.default_max_retries = retries;
    }
    let tasks = args.tasks.unwrap_or(config.demo.tasks);
    let work = Duration::from_millis(args.work_ms.unwrap_or(config.demo.work_ms));

    let scheduler = Scheduler::new(config.scheduler.clone()).context("invalid scheduler settings")?;
    terminal.print_banner(scheduler.concurrency(), tasks)?;

    let printer = Arc::clone(&terminal);
    scheduler.on_progress(move |event| {
        if let Err(e) = printer.display_event(event) {
            warn!(error = %e, "Failed to print progress event");
        }
    });

    for i in 0..tasks {
        scheduler.enqueue(job_for(i, work, args.flaky_attempts))?;
    }
    info!(tasks, "Enqueued demo batch");

    let interrupted = run_until_idle(&scheduler).await?;

    if args.reprocess && !interrupted {
        let count = scheduler.reprocess_failed_tasks().await?;
        if count > 0 {
            terminal.print_info(&format!("Reprocessing {} failed job(s)", count))?;
            run_until_idle(&scheduler).await?;
        }
    }

    let metrics = scheduler.metrics().await?;
    let failed = scheduler.failed_tasks().await?;
    terminal.print_summary(&metrics, &failed)?;

    Ok(())
}

/// Wait for the scheduler to drain. Ctrl+C cancels all work instead;
/// returns whether that happened.
async fn run_until_idle(scheduler: &Scheduler) -> Result<bool> {
    tokio::select! {
        done = scheduler.wait_for_completion() => {
            done?;
            Ok(false)
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")?;
            warn!("Interrupted; cancelling all tasks");
            scheduler.cancel_all().await?;
            Ok(true)
        }
    }
}
