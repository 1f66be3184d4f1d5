//! Queue configuration.

use std::time::Duration;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum jobs in Processing at once
    pub max_concurrent: usize,
    /// Backstop limit for a single job; `None` disables it
    pub job_timeout: Option<Duration>,
    /// How long after a cancel signal a task may keep running before it is aborted
    pub cancel_grace: Duration,
    /// Age after which finished jobs are pruned
    pub retention: Duration,
    /// Interval for the background pruning sweep; `None` disables it
    pub retention_sweep_interval: Option<Duration>,
    /// Bound on waiting for running jobs during shutdown
    pub shutdown_timeout: Duration,
    /// Capacity of the job event broadcast
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            job_timeout: None,
            cancel_grace: Duration::from_secs(5),
            retention: Duration::from_secs(3600), // 1 hour
            retention_sweep_interval: None,
            shutdown_timeout: Duration::from_secs(30),
            event_capacity: 256,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent: std::env::var("QUEUE_MAX_CONCURRENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_concurrent),
            job_timeout: std::env::var("QUEUE_JOB_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs),
            cancel_grace: Duration::from_secs(
                std::env::var("QUEUE_CANCEL_GRACE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            retention: Duration::from_secs(
                std::env::var("QUEUE_RETENTION_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            retention_sweep_interval: std::env::var("QUEUE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs),
            shutdown_timeout: Duration::from_secs(
                std::env::var("QUEUE_SHUTDOWN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            event_capacity: defaults.event_capacity,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_retention(mut self, retention: Duration, sweep_interval: Option<Duration>) -> Self {
        self.retention = retention;
        self.retention_sweep_interval = sweep_interval;
        self
    }
}
