//! Typed errors for the job pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`). Three families:
//! - [`PipelineError`]: pipeline-level failures that abort a whole pass
//!   (store unreachable, bad configuration, illegal transitions)
//! - [`StageError`]: unexpected failures raised inside a single stage; the
//!   runner converts every one of them into a retryable outcome
//! - [`SourceError`]: failures while fetching postings from a source

use std::time::Duration;

use thiserror::Error;

use crate::types::job::{ArtifactField, JobState};

/// Errors that abort a pipeline operation.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Storage operation failed
    #[error("storage error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The job does not exist in the store
    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// A caller asked the store for a transition the machine never makes
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: JobState, to: JobState },

    /// An artifact was offered for a field the expected state does not own
    #[error("state {state} does not own artifact field {field}")]
    ArtifactOwnership { state: JobState, field: ArtifactField },

    /// A persisted row could not be decoded
    #[error("corrupt row for job {job_id}: {reason}")]
    CorruptRow { job_id: String, reason: String },

    /// Pipeline definition or configuration is invalid
    #[error("config error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Wrap any backend error as a storage failure.
    pub fn store(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Store(err.into())
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(Box::new(err))
    }
}

/// Unexpected failures raised by a stage.
///
/// Stages signal business outcomes through `StageOutcome`; anything that
/// surfaces as a `StageError` is treated as transient and retried.
#[derive(Debug, Error)]
pub enum StageError {
    /// A required upstream artifact is absent
    #[error("missing artifact: {0}")]
    MissingArtifact(ArtifactField),

    /// An upstream artifact did not decode into the expected shape
    #[error("invalid {field} artifact: {source}")]
    InvalidArtifact {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The stage did not finish within its time budget
    #[error("stage timed out after {0:?}")]
    Timeout(Duration),

    /// The stage panicked
    #[error("stage panicked: {0}")]
    Panicked(String),

    /// Any other failure (network, I/O, throttling)
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl StageError {
    /// Build an `Other` error from a message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into().into())
    }
}

/// Errors that can occur while fetching postings.
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Feed answered with a non-success status
    #[error("feed error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Reading a local file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload was not valid JSON
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Payload was JSON but not a list of postings
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for stage executions.
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Result type alias for source fetches.
pub type SourceResult<T> = std::result::Result<T, SourceError>;
