//! Manager knobs derived from [`FlowConfig`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use simflow_core::config::FlowConfig;
use simflow_platform::RetryPolicy;

/// Exponential backoff schedule for status polling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// First sleep between refreshes.
    pub initial: Duration,
    /// Sleep ceiling.
    pub cap: Duration,
    /// Deadline after which polling raises `PollTimeout`.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy::from(&FlowConfig::default())
    }
}

impl From<&FlowConfig> for PollPolicy {
    fn from(config: &FlowConfig) -> Self {
        Self {
            initial: config.poll_initial(),
            cap: config.poll_cap(),
            timeout: config.poll_timeout(),
        }
    }
}

impl PollPolicy {
    /// Sleep following one of `current`: doubled, capped.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.cap)
    }
}

/// Options for one [`crate::ExperimentManager`] run.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerOptions {
    /// Simulations realized and created per platform call.
    pub batch_size: usize,
    /// Worker pool size for provisioning and polling.
    pub max_workers: usize,
    /// Abort the remaining batches on the first creation failure.
    pub fail_fast: bool,
    /// Retry schedule wrapped around every platform call.
    pub retry: RetryPolicy,
    /// Polling schedule.
    pub poll: PollPolicy,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        ManagerOptions::from(&FlowConfig::default())
    }
}

impl From<&FlowConfig> for ManagerOptions {
    fn from(config: &FlowConfig) -> Self {
        let attempts = u32::try_from(config.max_retries.max(1)).unwrap_or(u32::MAX);
        Self {
            batch_size: config.batch_size.max(1),
            max_workers: config.max_workers.max(1),
            fail_fast: config.fail_fast,
            retry: RetryPolicy::new(attempts),
            poll: PollPolicy::from(config),
        }
    }
}
