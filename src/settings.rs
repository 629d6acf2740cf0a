//! Settings for retry behavior and the provider caller.
//!
//! Settings load from a TOML file with environment-variable overrides using
//! the `TENDRIL` prefix (e.g. `TENDRIL_RETRY__MAX_ATTEMPTS=5`).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::caller::CliBackend;
use crate::error::ErrorKind;
use crate::retry::RetryPolicy;

/// Errors that can occur when loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file was not found.
    #[error("settings file not found: {0}")]
    FileNotFound(String),

    /// The settings file could not be parsed.
    #[error("failed to parse settings: {0}")]
    Parse(#[from] ConfigError),

    /// The settings file path is invalid.
    #[error("invalid settings path: {0}")]
    InvalidPath(String),
}

/// Retry configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Maximum number of attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Multiplier applied to the delay per attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Cap on any single backoff delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Whether unclassifiable failures are retried. Off by default: retrying
    /// an unrecognized failure risks masking a real bug.
    #[serde(default)]
    pub retry_unknown: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            retry_unknown: false,
        }
    }
}

impl RetrySettings {
    /// Builds the runtime retry policy these settings describe.
    pub fn to_policy(&self) -> RetryPolicy {
        let mut retryable: HashSet<ErrorKind> =
            [ErrorKind::RateLimited, ErrorKind::Transient].into_iter().collect();
        if self.retry_unknown {
            retryable.insert(ErrorKind::Unknown);
        }
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            backoff_multiplier: if self.backoff_multiplier < 1.0 {
                1.0
            } else {
                self.backoff_multiplier
            },
            max_delay: Duration::from_millis(self.max_delay_ms),
            retryable_kinds: retryable,
        }
    }
}

/// Provider caller configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct CallerSettings {
    /// Provider label stamped onto billing-related errors.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// CLI command to invoke.
    #[serde(default = "default_command")]
    pub command: String,
    /// Arguments passed before the prompt.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Working directory for the subprocess.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
}

impl Default for CallerSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            command: default_command(),
            args: default_args(),
            working_dir: default_working_dir(),
        }
    }
}

impl CallerSettings {
    /// Builds the CLI backend these settings describe.
    pub fn to_backend(&self) -> CliBackend {
        CliBackend::new(&self.command)
            .with_args(self.args.clone())
            .with_working_dir(&self.working_dir)
    }
}

/// Root settings structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Retry configuration.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Provider caller configuration.
    #[serde(default)]
    pub caller: CallerSettings,
}

impl Settings {
    /// Loads settings from a TOML file, with `TENDRIL`-prefixed
    /// environment variables taking precedence over file values.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();

        let path_str = path
            .to_str()
            .ok_or_else(|| SettingsError::InvalidPath(format!("{:?}", path)))?;

        if !path.exists() {
            return Err(SettingsError::FileNotFound(path_str.to_string()));
        }

        let config = Config::builder()
            .add_source(File::with_name(path_str))
            // Double underscore separates nested keys, e.g.
            // TENDRIL_RETRY__MAX_ATTEMPTS=5
            .add_source(
                Environment::with_prefix("TENDRIL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_provider() -> String {
    "Anthropic".to_string()
}

fn default_command() -> String {
    "claude".to_string()
}

fn default_args() -> Vec<String> {
    vec!["--print".to_string()]
}

fn default_working_dir() -> String {
    ".".to_string()
}
