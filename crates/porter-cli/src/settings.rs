//! `porter.toml` settings
//!
//! ```toml
//! [apply]
//! max_parallel = 4
//! call_timeout_secs = 30
//! rate_reserve = 0
//! checkpoint = "porter.checkpoint.json"
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 500
//! max_delay_ms = 30000
//! jitter = 0.2
//! max_rate_limit_waits = 10
//!
//! [logging]
//! level = "info"
//! json = false
//! ```
//!
//! Every key is optional. Missing keys take the engine defaults.

use anyhow::Context;
use porter_apply::{ApplyConfig, RetryPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "porter.toml";

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub apply: ApplySettings,
    pub retry: RetrySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplySettings {
    pub max_parallel: usize,
    pub call_timeout_secs: u64,
    pub rate_reserve: u32,
    /// Checkpoint file for resumable runs
    pub checkpoint: PathBuf,
}

impl Default for ApplySettings {
    fn default() -> Self {
        let config = ApplyConfig::default();
        Self {
            max_parallel: config.max_parallel,
            call_timeout_secs: config.call_timeout.as_secs(),
            rate_reserve: config.rate_reserve,
            checkpoint: PathBuf::from("porter.checkpoint.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
    pub max_rate_limit_waits: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: millis(policy.base_delay),
            max_delay_ms: millis(policy.max_delay),
            jitter: policy.jitter,
            max_rate_limit_waits: policy.max_rate_limit_waits,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Settings {
    /// Parse a settings document
    ///
    /// # Errors
    /// Returns error on malformed TOML or unknown keys
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid settings")
    }

    /// Load settings from `path`, or from `porter.toml` when present
    ///
    /// An explicit path must exist. Without one, a missing default file
    /// means built-in defaults.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, required) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_FILE), false),
        };
        if !required && !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("loading {}", path.display()))
    }

    /// Engine configuration described by these settings
    #[must_use]
    pub fn apply_config(&self) -> ApplyConfig {
        let retry = RetryPolicy::default()
            .with_max_attempts(self.retry.max_attempts)
            .with_delays(
                Duration::from_millis(self.retry.base_delay_ms),
                Duration::from_millis(self.retry.max_delay_ms),
            )
            .with_jitter(self.retry.jitter)
            .with_max_rate_limit_waits(self.retry.max_rate_limit_waits);
        ApplyConfig::new()
            .with_max_parallel(self.apply.max_parallel)
            .with_call_timeout(Duration::from_secs(self.apply.call_timeout_secs))
            .with_rate_reserve(self.apply.rate_reserve)
            .with_retry(retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_engine() {
        let settings = Settings::default();
        assert_eq!(settings.apply_config(), ApplyConfig::default());
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_partial_document() {
        let settings = Settings::from_toml(
            r#"
            [apply]
            max_parallel = 8
            rate_reserve = 10

            [retry]
            max_attempts = 2
            jitter = 0.0
            max_rate_limit_waits = 3

            [logging]
            json = true
            "#,
        )
        .unwrap();

        let config = settings.apply_config();
        assert_eq!(config.max_parallel, 8);
        assert_eq!(config.rate_reserve, 10);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.retry.max_rate_limit_waits, 3);
        assert!(settings.logging.json);
        assert_eq!(settings.apply.checkpoint, PathBuf::from("porter.checkpoint.json"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Settings::from_toml("[apply]\nparallel = 3\n").is_err());
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("missing.toml"))).is_err());

        let path = dir.path().join("porter.toml");
        std::fs::write(&path, "[apply]\ncheckpoint = \"state/cp.json\"\n").unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.apply.checkpoint, PathBuf::from("state/cp.json"));
    }
}
