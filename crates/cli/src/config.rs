use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use tasklane_scheduler::SchedulerConfig;

/// CLI configuration loaded from TOML file.
///
/// ```toml
/// [scheduler]
/// concurrency = 4
///
/// [demo]
/// tasks = 12
/// work_ms = 300
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub demo: DemoConfig,
}

/// Shape of the simulated workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    #[serde(default = "default_tasks")]
    pub tasks: usize,

    #[serde(default = "default_work_ms")]
    pub work_ms: u64,
}

fn default_tasks() -> usize {
    12
}

fn default_work_ms() -> u64 {
    300
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            tasks: default_tasks(),
            work_ms: default_work_ms(),
        }
    }
}

impl CliConfig {
    /// Return the default config file path: ~/.config/tasklane/config.toml
    pub fn default_config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("could not determine user config directory")?
            .join("tasklane");
        Ok(dir.join("config.toml"))
    }

    /// Load config from the given path, or the default path, then apply
    /// `TASKLANE_*` environment overrides. Missing files yield defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        let mut config = if config_path.exists() {
            debug!(?config_path, "Loading config");
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read config: {}", config_path.display()))?;
            toml::from_str::<Self>(&content)
                .with_context(|| format!("failed to parse config: {}", config_path.display()))?
        } else {
            debug!(?config_path, "Config file not found, using defaults");
            Self::default()
        };

        config.scheduler.apply_env_overrides();
        Ok(config)
    }
}
