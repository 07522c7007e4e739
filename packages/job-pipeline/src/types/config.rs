//! Configuration types for the runner.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for pipeline passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum jobs processed concurrently within one pass.
    ///
    /// Default: 4.
    pub workers: usize,

    /// Time budget for a single stage invocation.
    ///
    /// A stage that overruns is abandoned and the job is retried on the
    /// next pass. Default: 120 seconds.
    pub stage_timeout: Duration,

    /// Upper bound on passes made by `run_until_quiescent`.
    ///
    /// Default: 20.
    pub max_passes: usize,

    /// Retry ceiling for retryable outcomes.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            stage_timeout: Duration::from_secs(120),
            max_passes: 20,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count (clamped to at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the per-stage timeout.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Set the pass limit for `run_until_quiescent`.
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Bounded retry policy for `RetryableError` outcomes.
///
/// Each retryable outcome increments the job's persisted `attempts`
/// counter. Once the counter reaches `max_attempts` the job is failed
/// instead of retried. There is no time-based backoff; the next pass is
/// the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
        }
    }
}

impl RetryPolicy {
    /// Fail after `max_attempts` consecutive retryable outcomes.
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    /// Never escalate retryable outcomes.
    pub fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    /// Whether the attempt numbered `attempt` (1-based) uses up the budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt >= max,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_passes, 20);
        assert_eq!(config.retry.max_attempts, Some(5));
    }

    #[test]
    fn test_workers_clamped() {
        assert_eq!(PipelineConfig::new().with_workers(0).workers, 1);
    }

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy::bounded(3);
        assert!(!policy.is_exhausted(1));
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(!RetryPolicy::unbounded().is_exhausted(u32::MAX));
    }
}
