use clap::Parser;

/// Demo driver for the tasklane scheduler.
///
/// Enqueues a batch of simulated jobs, some of which fail transiently or
/// permanently, and streams their progress to the terminal. Ctrl+C cancels
/// everything still queued or running.
#[derive(Parser, Debug)]
#[command(name = "tasklane", about = "Run simulated jobs through the tasklane scheduler")]
pub struct CliArgs {
    /// Path to config file (default: ~/.config/tasklane/config.toml)
    #[arg(long)]
    pub config: Option<String>,

    /// Slot count override
    #[arg(long, short = 'c')]
    pub concurrency: Option<usize>,

    /// Default retries override
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Number of simulated jobs to enqueue
    #[arg(long, short = 'n')]
    pub tasks: Option<usize>,

    /// Simulated work per attempt, in milliseconds
    #[arg(long)]
    pub work_ms: Option<u64>,

    /// Failures a flaky job produces before it succeeds
    #[arg(long, default_value = "1")]
    pub flaky_attempts: u32,

    /// Give failed jobs one more round before exiting
    #[arg(long)]
    pub reprocess: bool,

    /// Print progress events as JSON lines instead of coloured text
    #[arg(long)]
    pub json: bool,
}
