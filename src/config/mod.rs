//! Application configuration
//!
//! Settings come from a TOML file (see [`loader`]) with environment
//! overrides merged on top. Durations are written in humantime form such
//! as `"100ms"` or `"30s"`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::stages::AllocationPolicy;
use crate::workflow::event::DEFAULT_EVENT_RETENTION;
use crate::workflow::router::DEFAULT_SEVERITY_THRESHOLD;

pub mod loader;

pub use loader::{default_config_path, ConfigLoader, LOCAL_CONFIG_FILE};

/// Prefix for every environment override
pub const ENV_PREFIX: &str = "RESILIENTFLOW_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Tracing filter used when neither `-v` nor `RUST_LOG` is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    pub workflow: WorkflowConfig,
    pub events: EventLogConfig,
    pub stages: StageSettings,
}

/// Settings the executor reads for every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Assessed severity at or above which the full pipeline runs
    #[serde(default = "default_severity_threshold")]
    pub severity_threshold: u8,

    /// Total attempts per stage call, first attempt included
    #[serde(default = "default_max_attempts", alias = "max_retries")]
    pub max_attempts: u32,

    #[serde(with = "humantime_serde", default = "default_retry_base_delay")]
    pub retry_base_delay: Duration,

    #[serde(with = "humantime_serde", default = "default_max_retry_delay")]
    pub max_retry_delay: Duration,

    #[serde(default)]
    pub retry_jitter: bool,

    /// Upper bound for a single stage attempt
    #[serde(with = "humantime_serde", default = "default_stage_timeout")]
    pub stage_timeout: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            severity_threshold: default_severity_threshold(),
            max_attempts: default_max_attempts(),
            retry_base_delay: default_retry_base_delay(),
            max_retry_delay: default_max_retry_delay(),
            retry_jitter: false,
            stage_timeout: default_stage_timeout(),
        }
    }
}

impl WorkflowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.severity_threshold > 100 {
            return Err(Error::InvalidConfig(format!(
                "severity_threshold must be between 0 and 100, got {}",
                self.severity_threshold
            )));
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.stage_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "stage_timeout must be greater than zero".to_string(),
            ));
        }
        if self.retry_base_delay > self.max_retry_delay {
            return Err(Error::InvalidConfig(format!(
                "retry_base_delay ({:?}) exceeds max_retry_delay ({:?})",
                self.retry_base_delay, self.max_retry_delay
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    /// Append step events to this JSONL file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Keep at most this many events in memory
    pub retain: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            retain: DEFAULT_EVENT_RETENTION,
        }
    }
}

/// Knobs of the bundled reference stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSettings {
    /// Artificial delay added to each reference stage call
    #[serde(with = "humantime_serde", default)]
    pub simulated_latency: Duration,
    #[serde(default)]
    pub allocation: AllocationPolicy,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.workflow.validate()?;
        if self.events.retain == 0 {
            return Err(Error::InvalidConfig(
                "events.retain must be at least 1".to_string(),
            ));
        }
        self.stages.allocation.validate()
    }

    /// Apply `RESILIENTFLOW_*` overrides from the process environment
    pub fn merge_env_vars(&mut self) {
        self.merge_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Values that fail to parse
    /// are logged and ignored.
    pub fn merge_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(value) = var("SEVERITY_THRESHOLD") {
            match value.parse() {
                Ok(threshold) => self.workflow.severity_threshold = threshold,
                Err(_) => warn!("Ignoring invalid {ENV_PREFIX}SEVERITY_THRESHOLD: {value}"),
            }
        }

        if let Some(value) = var("MAX_ATTEMPTS") {
            match value.parse() {
                Ok(attempts) => self.workflow.max_attempts = attempts,
                Err(_) => warn!("Ignoring invalid {ENV_PREFIX}MAX_ATTEMPTS: {value}"),
            }
        }

        if let Some(value) = var("RETRY_BASE_DELAY") {
            match parse_duration(&value) {
                Some(delay) => self.workflow.retry_base_delay = delay,
                None => warn!("Ignoring invalid {ENV_PREFIX}RETRY_BASE_DELAY: {value}"),
            }
        }

        if let Some(value) = var("STAGE_TIMEOUT") {
            match parse_duration(&value) {
                Some(timeout) => self.workflow.stage_timeout = timeout,
                None => warn!("Ignoring invalid {ENV_PREFIX}STAGE_TIMEOUT: {value}"),
            }
        }

        if let Some(level) = var("LOG_LEVEL") {
            self.log_level = Some(level);
        }

        if let Some(path) = var("EVENT_LOG") {
            self.events.log_file = Some(PathBuf::from(path));
        }
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    humantime_serde::re::humantime::parse_duration(value.trim()).ok()
}

fn default_severity_threshold() -> u8 {
    DEFAULT_SEVERITY_THRESHOLD
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_retry_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_stage_timeout() -> Duration {
    Duration::from_secs(30)
}
