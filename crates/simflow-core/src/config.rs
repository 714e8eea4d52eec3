//! Run configuration loaded from YAML with environment overrides.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, FlowError};
use crate::serde::from_yaml_slice;

/// Environment variable overriding [`FlowConfig::max_workers`].
pub const ENV_MAX_WORKERS: &str = "SIMFLOW_MAX_WORKERS";
/// Environment variable overriding [`FlowConfig::batch_size`].
pub const ENV_BATCH_SIZE: &str = "SIMFLOW_BATCH_SIZE";

/// Upper bound applied to the detected hardware parallelism.
pub const WORKER_CAP: usize = 16;
/// Path-length ceiling of hosts without long path support.
pub const WINDOWS_MAX_PATH: usize = 256;

const EIGHT_HOURS_SECS: f64 = 8.0 * 60.0 * 60.0;

/// YAML-configurable options shared by the experiment and analyze managers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Worker pool size used for analysis and management.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Simulations created per platform round-trip.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Hard ceiling on analysis wall-clock, in seconds.
    #[serde(default = "default_eight_hours")]
    pub analyze_timeout_secs: f64,
    /// Admit incomplete experiments to analysis.
    #[serde(default)]
    pub partial_analyze_ok: bool,
    /// Include failed simulations in analysis.
    #[serde(default)]
    pub analyze_failed_items: bool,
    /// Cap on analyzed simulations; implies `partial_analyze_ok`.
    #[serde(default)]
    pub max_items: Option<usize>,
    /// Initial polling interval, in seconds.
    #[serde(default = "default_poll_initial")]
    pub poll_initial_secs: f64,
    /// Polling interval ceiling, in seconds.
    #[serde(default = "default_poll_cap")]
    pub poll_cap_secs: f64,
    /// Deadline for status polling, in seconds.
    #[serde(default = "default_eight_hours")]
    pub poll_timeout_secs: f64,
    /// Use symbolic links for file placement when the backend supports them.
    #[serde(default = "default_true")]
    pub sym_link: bool,
    /// Use `<name>_<id>` for suite and experiment directories.
    #[serde(default = "default_true")]
    pub name_directory: bool,
    /// Use `<name>_<id>` for simulation directories.
    #[serde(default)]
    pub sim_name_directory: bool,
    /// Abort remaining batches on the first creation failure.
    #[serde(default)]
    pub fail_fast: bool,
    /// Attempt ceiling for retryable platform failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Path-length ceiling enforced before filesystem writes.
    #[serde(default = "default_max_path_length")]
    pub max_path_length: Option<usize>,
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(WORKER_CAP)
}

fn default_batch_size() -> usize {
    10
}

fn default_eight_hours() -> f64 {
    EIGHT_HOURS_SECS
}

fn default_poll_initial() -> f64 {
    1.15
}

fn default_poll_cap() -> f64 {
    30.0
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> usize {
    3
}

fn default_max_path_length() -> Option<usize> {
    if cfg!(windows) {
        Some(WINDOWS_MAX_PATH)
    } else {
        None
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            batch_size: default_batch_size(),
            analyze_timeout_secs: EIGHT_HOURS_SECS,
            partial_analyze_ok: false,
            analyze_failed_items: false,
            max_items: None,
            poll_initial_secs: default_poll_initial(),
            poll_cap_secs: default_poll_cap(),
            poll_timeout_secs: EIGHT_HOURS_SECS,
            sym_link: true,
            name_directory: true,
            sim_name_directory: false,
            fail_fast: false,
            max_retries: default_max_retries(),
            max_path_length: default_max_path_length(),
        }
    }
}

impl FlowConfig {
    /// Loads a configuration document from a YAML file.
    pub fn load(path: &Path) -> Result<Self, FlowError> {
        let bytes = fs::read(path).map_err(|err| {
            FlowError::io("config_read", err).with_context("path", path.display().to_string())
        })?;
        let config: FlowConfig = from_yaml_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `SIMFLOW_*` environment overrides on top of the loaded values.
    pub fn apply_env(mut self) -> Result<Self, FlowError> {
        if let Some(workers) = read_env_usize(ENV_MAX_WORKERS)? {
            self.max_workers = workers;
        }
        if let Some(batch) = read_env_usize(ENV_BATCH_SIZE)? {
            self.batch_size = batch;
        }
        self.validate()?;
        Ok(self)
    }

    /// Rejects option combinations no manager can honour.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.max_workers == 0 {
            return Err(invalid_option("max_workers", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(invalid_option("batch_size", "must be at least 1"));
        }
        for (name, value) in [
            ("analyze_timeout_secs", self.analyze_timeout_secs),
            ("poll_initial_secs", self.poll_initial_secs),
            ("poll_cap_secs", self.poll_cap_secs),
            ("poll_timeout_secs", self.poll_timeout_secs),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid_option(name, "must be a positive number of seconds"));
            }
        }
        if self.poll_cap_secs < self.poll_initial_secs {
            return Err(invalid_option("poll_cap_secs", "must not be below poll_initial_secs"));
        }
        Ok(())
    }

    /// Whether analysis may proceed with only part of the simulations ready.
    pub fn partial_analysis(&self) -> bool {
        self.partial_analyze_ok || self.max_items.is_some()
    }

    /// Analysis wall-clock ceiling.
    pub fn analyze_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.analyze_timeout_secs)
    }

    /// Initial polling interval.
    pub fn poll_initial(&self) -> Duration {
        Duration::from_secs_f64(self.poll_initial_secs)
    }

    /// Polling interval ceiling.
    pub fn poll_cap(&self) -> Duration {
        Duration::from_secs_f64(self.poll_cap_secs)
    }

    /// Status polling deadline.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.poll_timeout_secs)
    }
}

fn read_env_usize(name: &str) -> Result<Option<usize>, FlowError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<usize>().map(Some).map_err(|err| {
            FlowError::Validation(
                ErrorInfo::new("config_env", format!("invalid value for {name}"))
                    .with_context("value", raw.clone())
                    .with_hint(err.to_string()),
            )
        }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(FlowError::validation("config_env", err.to_string())),
    }
}

fn invalid_option(option: &str, message: &str) -> FlowError {
    FlowError::Validation(
        ErrorInfo::new("config_invalid", format!("{option} {message}")).with_context("option", option),
    )
}
