//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of workers draining the event queue
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Optimistic concurrency retries before an update gives up
    #[serde(default = "default_max_update_attempts")]
    pub max_update_attempts: u32,

    /// Intervention wait applied when a manual intervention adviser does
    /// not specify one
    #[serde(default = "default_intervention_timeout_secs")]
    pub intervention_timeout_secs: u64,

    /// Wait before a retry when a retry adviser does not specify one
    #[serde(default)]
    pub default_retry_wait_secs: u64,

    /// Capacity of the status update broadcast channel
    #[serde(default = "default_status_channel_capacity")]
    pub status_channel_capacity: usize,

    /// How long a finished plan's correlation records are kept, so late
    /// responses are still recognized as duplicates. Unclaimed early
    /// responses are held for the same time.
    #[serde(default = "default_correlation_retention_secs")]
    pub correlation_retention_secs: u64,
}

fn default_workers() -> usize {
    4
}

fn default_max_update_attempts() -> u32 {
    16
}

fn default_intervention_timeout_secs() -> u64 {
    3600
}

fn default_status_channel_capacity() -> usize {
    1024
}

fn default_correlation_retention_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_update_attempts: default_max_update_attempts(),
            intervention_timeout_secs: default_intervention_timeout_secs(),
            default_retry_wait_secs: 0,
            status_channel_capacity: default_status_channel_capacity(),
            correlation_retention_secs: default_correlation_retention_secs(),
        }
    }
}

impl EngineConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_status_channel_capacity(mut self, capacity: usize) -> Self {
        self.status_channel_capacity = capacity;
        self
    }

    pub fn with_correlation_retention(mut self, retention: Duration) -> Self {
        self.correlation_retention_secs = retention.as_secs();
        self
    }

    pub fn intervention_timeout(&self) -> Duration {
        Duration::from_secs(self.intervention_timeout_secs)
    }

    pub fn default_retry_wait(&self) -> Duration {
        Duration::from_secs(self.default_retry_wait_secs)
    }

    pub fn correlation_retention(&self) -> Duration {
        Duration::from_secs(self.correlation_retention_secs)
    }
}
