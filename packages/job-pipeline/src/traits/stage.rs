//! Stage trait and outcomes.
//!
//! A stage is one unit of business logic: it reads the artifacts accumulated
//! so far and reports what should happen to the job. Stages never touch the
//! store; the state machine records their result.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StageResult;
use crate::types::job::Artifacts;

/// Protocol result of a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Stage completed; `Value` is written into the state's artifact column.
    Advance(Value),

    /// Business decision not to continue. Terminal, not an error.
    ///
    /// `artifact` is kept when the rejecting stage owns the decision column.
    Reject {
        reason: String,
        artifact: Option<Value>,
    },

    /// Transient failure; the job stays put and runs again next pass.
    RetryableError(String),

    /// Unrecoverable failure; the job is parked in `FAILED`.
    FatalError(String),
}

impl StageOutcome {
    pub fn advance(artifact: Value) -> Self {
        Self::Advance(artifact)
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject {
            reason: reason.into(),
            artifact: None,
        }
    }

    /// Reject while keeping the stage's own artifact (e.g. a scored decision).
    pub fn reject_with(reason: impl Into<String>, artifact: Value) -> Self {
        Self::Reject {
            reason: reason.into(),
            artifact: Some(artifact),
        }
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Self::RetryableError(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::FatalError(reason.into())
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StageOutcome::Advance(_) => "advance",
            StageOutcome::Reject { .. } => "reject",
            StageOutcome::RetryableError(_) => "retryable_error",
            StageOutcome::FatalError(_) => "fatal_error",
        }
    }
}

/// One pipeline stage.
///
/// Implementations must tolerate being invoked again on the same inputs: a
/// crash between a stage finishing and its result being committed means the
/// stage runs again on the next pass.
///
/// Returning `Err` is treated as a transient failure. Only an explicit
/// `StageOutcome::FatalError` terminates a job.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Process a job's accumulated artifacts.
    async fn process(&self, artifacts: &Artifacts) -> StageResult<StageOutcome>;
}
