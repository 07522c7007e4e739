//! Job records, pipeline states and artifact fields.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PipelineError, StageError, StageResult};

/// Position of a job in the pipeline.
///
/// The forward path is `DISCOVERED -> NORMALIZED -> EVALUATED -> PLANNED ->
/// MATERIALS_READY -> SUBMITTED`. `REJECTED` and `FAILED` are terminal side
/// states reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Discovered,
    Normalized,
    Evaluated,
    Planned,
    MaterialsReady,
    Submitted,
    Rejected,
    Failed,
}

impl JobState {
    /// Initial state of every ingested job.
    pub const INITIAL: JobState = JobState::Discovered;

    /// Every state, forward path first.
    pub const ALL: [JobState; 8] = [
        JobState::Discovered,
        JobState::Normalized,
        JobState::Evaluated,
        JobState::Planned,
        JobState::MaterialsReady,
        JobState::Submitted,
        JobState::Rejected,
        JobState::Failed,
    ];

    /// States that still have a stage to run.
    pub const ACTIVE: [JobState; 5] = [
        JobState::Discovered,
        JobState::Normalized,
        JobState::Evaluated,
        JobState::Planned,
        JobState::MaterialsReady,
    ];

    /// Persisted label.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Discovered => "DISCOVERED",
            JobState::Normalized => "NORMALIZED",
            JobState::Evaluated => "EVALUATED",
            JobState::Planned => "PLANNED",
            JobState::MaterialsReady => "MATERIALS_READY",
            JobState::Submitted => "SUBMITTED",
            JobState::Rejected => "REJECTED",
            JobState::Failed => "FAILED",
        }
    }

    /// True for states with no outgoing transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Submitted | JobState::Rejected | JobState::Failed
        )
    }

    /// Rank along the forward path; `None` for the side states.
    pub fn rank(&self) -> Option<u8> {
        match self {
            JobState::Discovered => Some(0),
            JobState::Normalized => Some(1),
            JobState::Evaluated => Some(2),
            JobState::Planned => Some(3),
            JobState::MaterialsReady => Some(4),
            JobState::Submitted => Some(5),
            JobState::Rejected | JobState::Failed => None,
        }
    }

    /// Next state on the forward path.
    pub fn next(&self) -> Option<JobState> {
        match self {
            JobState::Discovered => Some(JobState::Normalized),
            JobState::Normalized => Some(JobState::Evaluated),
            JobState::Evaluated => Some(JobState::Planned),
            JobState::Planned => Some(JobState::MaterialsReady),
            JobState::MaterialsReady => Some(JobState::Submitted),
            _ => None,
        }
    }

    /// Artifact column written when the stage for this state completes.
    pub fn owned_field(&self) -> Option<ArtifactField> {
        match self {
            JobState::Discovered => Some(ArtifactField::Normalized),
            JobState::Normalized => Some(ArtifactField::Decision),
            JobState::Evaluated => Some(ArtifactField::Plan),
            JobState::Planned => Some(ArtifactField::Materials),
            _ => None,
        }
    }

    /// Whether the machine may move a job from `self` to `to`.
    pub fn can_transition_to(&self, to: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.next() == Some(to) || matches!(to, JobState::Rejected | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| PipelineError::Config(format!("unknown job state: {s}")))
    }
}

/// A stage-owned artifact column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactField {
    Normalized,
    Decision,
    Plan,
    Materials,
}

impl ArtifactField {
    /// Column name in the persisted layout.
    pub fn column(&self) -> &'static str {
        match self {
            ArtifactField::Normalized => "normalized_data",
            ArtifactField::Decision => "decision_data",
            ArtifactField::Plan => "plan_data",
            ArtifactField::Materials => "materials_data",
        }
    }
}

impl fmt::Display for ArtifactField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// An artifact value bound to the column it is written into.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub field: ArtifactField,
    pub value: Value,
}

impl Artifact {
    pub fn new(field: ArtifactField, value: Value) -> Self {
        Self { field, value }
    }
}

/// One row of the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Stable identifier, unique per posting
    pub job_id: String,

    /// Payload as fetched from the source; never mutated
    pub raw_data: Value,

    /// Output of the normalize stage
    pub normalized_data: Option<Value>,

    /// Output of the evaluation stage (score + verdict)
    pub decision_data: Option<Value>,

    /// Output of the planning stage
    pub plan_data: Option<Value>,

    /// Output of the material-generation stage
    pub materials_data: Option<Value>,

    /// Current position in the pipeline
    pub state: JobState,

    /// Consecutive retryable failures in the current state
    pub attempts: u32,

    /// Reason of the latest retryable or fatal outcome
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// A freshly ingested row.
    pub fn new(job_id: impl Into<String>, raw_data: Value) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            raw_data,
            normalized_data: None,
            decision_data: None,
            plan_data: None,
            materials_data: None,
            state: JobState::INITIAL,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True while the job still has a stage to run.
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Artifact stored in `field`, if its stage has completed.
    pub fn artifact(&self, field: ArtifactField) -> Option<&Value> {
        match field {
            ArtifactField::Normalized => self.normalized_data.as_ref(),
            ArtifactField::Decision => self.decision_data.as_ref(),
            ArtifactField::Plan => self.plan_data.as_ref(),
            ArtifactField::Materials => self.materials_data.as_ref(),
        }
    }

    pub(crate) fn artifact_slot(&mut self, field: ArtifactField) -> &mut Option<Value> {
        match field {
            ArtifactField::Normalized => &mut self.normalized_data,
            ArtifactField::Decision => &mut self.decision_data,
            ArtifactField::Plan => &mut self.plan_data,
            ArtifactField::Materials => &mut self.materials_data,
        }
    }

    /// Snapshot of everything a stage may read.
    pub fn artifacts(&self) -> Artifacts {
        Artifacts {
            job_id: self.job_id.clone(),
            raw: self.raw_data.clone(),
            normalized: self.normalized_data.clone(),
            decision: self.decision_data.clone(),
            plan: self.plan_data.clone(),
            materials: self.materials_data.clone(),
        }
    }
}

/// Accumulated artifacts handed to a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifacts {
    pub job_id: String,
    pub raw: Value,
    pub normalized: Option<Value>,
    pub decision: Option<Value>,
    pub plan: Option<Value>,
    pub materials: Option<Value>,
}

impl Artifacts {
    /// Artifact for `field`, if present.
    pub fn get(&self, field: ArtifactField) -> Option<&Value> {
        match field {
            ArtifactField::Normalized => self.normalized.as_ref(),
            ArtifactField::Decision => self.decision.as_ref(),
            ArtifactField::Plan => self.plan.as_ref(),
            ArtifactField::Materials => self.materials.as_ref(),
        }
    }

    /// Decode the raw payload.
    pub fn decode_raw<T: DeserializeOwned>(&self) -> StageResult<T> {
        serde_json::from_value(self.raw.clone()).map_err(|source| StageError::InvalidArtifact {
            field: "raw_data",
            source,
        })
    }

    /// Decode a required upstream artifact.
    pub fn decode<T: DeserializeOwned>(&self, field: ArtifactField) -> StageResult<T> {
        let value = self
            .get(field)
            .ok_or(StageError::MissingArtifact(field))?;
        serde_json::from_value(value.clone()).map_err(|source| StageError::InvalidArtifact {
            field: field.column(),
            source,
        })
    }
}
