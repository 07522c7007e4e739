//! Record store trait.
//!
//! The store is the sole source of truth for resumability. Every mutation
//! is a compare-and-set on the row's `state`: callers name the state they
//! observed, and the write only lands if the row is still in it. That check
//! is the one synchronization point between concurrent runners.
//!
//! Writes that leave the state unchanged (`record_retry`) or that are
//! decided by the retry budget (`mark_failed`) also name the `attempts`
//! value the caller read, so two runners that both saw the same row cannot
//! both count a retry against it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::types::job::{Artifact, JobRecord, JobState};

/// Result of a guarded mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The row was in the expected state and has been mutated.
    Applied,
    /// The row had already moved on (or the target column was already
    /// written); nothing was mutated.
    Conflict,
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied)
    }
}

/// Durable, per-job record storage.
///
/// # Implementer Notes
///
/// - Every mutation must be durable before the call returns
/// - `update`, `record_retry` and `mark_failed` must check-and-write
///   atomically per row
/// - `record_retry` and `mark_failed` report `Conflict` when the row's
///   `attempts` no longer matches the caller's
/// - Artifact columns are append-only: writing into a non-null column is
///   reported as `Conflict`
/// - `list_active` and `list_all` return rows in insertion order
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a row in the initial state if `job_id` is absent.
    ///
    /// Returns whether an insert happened. Never overwrites.
    async fn put_new(&self, job_id: &str, raw_data: &Value) -> Result<bool>;

    /// Get a row by id.
    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>>;

    /// All rows in a non-terminal state, in insertion order.
    async fn list_active(&self) -> Result<Vec<JobRecord>>;

    /// All rows, in insertion order.
    async fn list_all(&self) -> Result<Vec<JobRecord>>;

    /// Move a row from `expected` to `new_state`, writing `artifact` in the
    /// same commit. Resets `attempts` and `last_error`.
    async fn update(
        &self,
        job_id: &str,
        expected: JobState,
        new_state: JobState,
        artifact: Option<&Artifact>,
    ) -> Result<UpdateOutcome>;

    /// Count a retryable failure against a row still in `expected` with
    /// `attempts` retries recorded.
    async fn record_retry(
        &self,
        job_id: &str,
        expected: JobState,
        attempts: u32,
        reason: &str,
    ) -> Result<UpdateOutcome>;

    /// Move a row from `expected` (with `attempts` retries recorded) to
    /// `FAILED`, recording `reason`.
    async fn mark_failed(
        &self,
        job_id: &str,
        expected: JobState,
        attempts: u32,
        reason: &str,
    ) -> Result<UpdateOutcome>;

    /// Number of rows per state.
    async fn count_by_state(&self) -> Result<BTreeMap<JobState, usize>> {
        let mut counts = BTreeMap::new();
        for job in self.list_all().await? {
            *counts.entry(job.state).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Release the underlying handle.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Check an `update` request against the transition rules.
///
/// Shared by every backend so that no store can be asked to move a job
/// backward or write a column the expected state does not own.
pub fn validate_update(
    expected: JobState,
    new_state: JobState,
    artifact: Option<&Artifact>,
) -> Result<()> {
    if !expected.can_transition_to(new_state) {
        return Err(PipelineError::IllegalTransition {
            from: expected,
            to: new_state,
        });
    }

    if let Some(artifact) = artifact {
        if expected.owned_field() != Some(artifact.field) {
            return Err(PipelineError::ArtifactOwnership {
                state: expected,
                field: artifact.field,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::job::ArtifactField;
    use serde_json::json;

    #[test]
    fn test_validate_forward_with_owned_field() {
        let artifact = Artifact::new(ArtifactField::Decision, json!({"verdict": "apply"}));
        assert!(validate_update(JobState::Normalized, JobState::Evaluated, Some(&artifact)).is_ok());
        assert!(validate_update(JobState::Normalized, JobState::Rejected, Some(&artifact)).is_ok());
    }

    #[test]
    fn test_validate_rejects_backward() {
        let err = validate_update(JobState::Planned, JobState::Evaluated, None).unwrap_err();
        assert!(matches!(err, PipelineError::IllegalTransition { .. }));
    }

    #[test]
    fn test_validate_rejects_foreign_field() {
        let artifact = Artifact::new(ArtifactField::Plan, json!({}));
        let err =
            validate_update(JobState::Discovered, JobState::Normalized, Some(&artifact)).unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactOwnership { .. }));
    }
}
