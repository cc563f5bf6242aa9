use std::time::Duration;

use serde::Deserialize;

/// Retry and history bounds of the build job queue.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// A job requeued more often than this ends as failed.
    pub max_retries: u32,
    /// Finished jobs remembered per agent.
    pub recent_jobs: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            recent_jobs: 20,
        }
    }
}

/// Heartbeat staleness detection.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub timeout_ms: u64,
    pub sweep_interval_ms: u64,
}

impl LivenessConfig {
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[inline]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            sweep_interval_ms: 10_000,
        }
    }
}
