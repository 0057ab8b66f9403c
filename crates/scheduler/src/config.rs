use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::retry::{ExponentialBackoff, RetryPolicy};

/// Scheduler configuration, typically parsed from TOML.
///
/// ```toml
/// concurrency = 4
/// default_max_retries = 3
///
/// [backoff]
/// base_delay_ms = 1000
/// max_delay_ms = 30000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of tasks occupying a slot at once. Must be > 0.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Retries granted to tasks that do not set their own.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Parameters of the default exponential backoff.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_concurrency() -> usize { 4 }
fn default_max_retries() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 1000 }
fn default_max_delay_ms() -> u64 { 30_000 }

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffConfig {
    pub fn policy(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            default_max_retries: default_max_retries(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Config with the given concurrency and defaults for everything else.
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Self::default()
        }
    }

    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, SchedulerError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, SchedulerError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// The default retry policy described by `backoff`.
    pub fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
        Arc::new(self.backoff.policy())
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// - `TASKLANE_CONCURRENCY` → `concurrency`
    /// - `TASKLANE_MAX_RETRIES` → `default_max_retries`
    /// - `TASKLANE_BACKOFF_BASE_MS` → `backoff.base_delay_ms`
    /// - `TASKLANE_BACKOFF_MAX_MS` → `backoff.max_delay_ms`
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("TASKLANE_CONCURRENCY") {
            self.concurrency = v;
        }
        if let Some(v) = env_parse("TASKLANE_MAX_RETRIES") {
            self.default_max_retries = v;
        }
        if let Some(v) = env_parse("TASKLANE_BACKOFF_BASE_MS") {
            self.backoff.base_delay_ms = v;
        }
        if let Some(v) = env_parse("TASKLANE_BACKOFF_MAX_MS") {
            self.backoff.max_delay_ms = v;
        }
    }

    // ── Validation ──────────────────────────────────────────────────

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.concurrency == 0 {
            return Err(SchedulerError::InvalidConfig(
                "concurrency must be a positive integer".into(),
            ));
        }
        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            return Err(SchedulerError::InvalidConfig(format!(
                "backoff base delay ({}ms) exceeds max delay ({}ms)",
                self.backoff.base_delay_ms, self.backoff.max_delay_ms
            )));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.backoff.base_delay_ms, 1000);
        assert_eq!(config.backoff.max_delay_ms, 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_partial_toml() {
        let config = SchedulerConfig::from_toml("concurrency = 2\n").unwrap();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.backoff, BackoffConfig::default());
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
            concurrency = 8
            default_max_retries = 0

            [backoff]
            base_delay_ms = 50
            max_delay_ms = 400
        "#;
        let config = SchedulerConfig::from_toml(toml).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.default_max_retries, 0);
        assert_eq!(config.retry_policy().delay(3), Duration::from_millis(400));
        assert_eq!(config.retry_policy().delay(1), Duration::from_millis(100));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = SchedulerConfig::from_toml("concurrency = 0").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    }

    #[test]
    fn inverted_backoff_is_rejected() {
        let mut config = SchedulerConfig::default();
        config.backoff.base_delay_ms = 60_000;
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidConfig(msg)) if msg.contains("exceeds")
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = SchedulerConfig::from_toml("concurrency = \"many\"").unwrap_err();
        assert!(matches!(err, SchedulerError::ConfigParse(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "concurrency = 3").unwrap();
        let config = SchedulerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.concurrency, 3);

        let missing = SchedulerConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(missing, SchedulerError::ConfigIo(_)));
    }
}
