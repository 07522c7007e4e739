//! Per-job outcomes and pass summaries.

use serde::{Deserialize, Serialize};

use crate::types::job::JobState;

/// What happened to one job during a pass.
///
/// Every job listed at the start of a pass ends in exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Moved forward one state
    Advanced {
        job_id: String,
        from: JobState,
        to: JobState,
    },
    /// Business decision not to continue
    Rejected { job_id: String, from: JobState },
    /// Fatal stage signal or exhausted retry budget
    Failed {
        job_id: String,
        from: JobState,
        reason: String,
    },
    /// Left in place, will run again next pass
    Retried {
        job_id: String,
        state: JobState,
        reason: String,
    },
    /// Another worker moved the row first; result discarded
    Conflict { job_id: String, state: JobState },
    /// Not started because the pass was cancelled
    Cancelled { job_id: String, state: JobState },
}

impl JobOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            JobOutcome::Advanced { job_id, .. }
            | JobOutcome::Rejected { job_id, .. }
            | JobOutcome::Failed { job_id, .. }
            | JobOutcome::Retried { job_id, .. }
            | JobOutcome::Conflict { job_id, .. }
            | JobOutcome::Cancelled { job_id, .. } => job_id,
        }
    }
}

/// Tally of one or more passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub advanced: usize,
    pub rejected: usize,
    pub failed: usize,
    pub retried: usize,
    pub conflicts: usize,
    pub cancelled: usize,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one job outcome.
    pub fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Advanced { .. } => self.advanced += 1,
            JobOutcome::Rejected { .. } => self.rejected += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
            JobOutcome::Retried { .. } => self.retried += 1,
            JobOutcome::Conflict { .. } => self.conflicts += 1,
            JobOutcome::Cancelled { .. } => self.cancelled += 1,
        }
    }

    /// Fold another summary into this one.
    pub fn merge(&mut self, other: &RunSummary) {
        self.advanced += other.advanced;
        self.rejected += other.rejected;
        self.failed += other.failed;
        self.retried += other.retried;
        self.conflicts += other.conflicts;
        self.cancelled += other.cancelled;
    }

    /// Jobs accounted for.
    pub fn total(&self) -> usize {
        self.advanced + self.rejected + self.failed + self.retried + self.conflicts + self.cancelled
    }

    /// Jobs whose row did not change.
    pub fn unchanged(&self) -> usize {
        self.retried + self.conflicts + self.cancelled
    }
}

/// Result of `run_until_quiescent`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuiescenceReport {
    /// Passes executed
    pub passes: usize,

    /// Outcomes summed over every pass
    pub totals: RunSummary,

    /// True when the loop stopped on the pass limit rather than quiescence
    pub pass_limit_reached: bool,
}
