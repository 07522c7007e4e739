//! Reference stages for the job-application pipeline.
//!
//! | State             | Stage              | Writes            |
//! |-------------------|--------------------|-------------------|
//! | `DISCOVERED`      | [`Normalizer`]     | `normalized_data` |
//! | `NORMALIZED`      | [`Evaluator`]      | `decision_data`   |
//! | `EVALUATED`       | [`Planner`]        | `plan_data`       |
//! | `PLANNED`         | [`MaterialsWriter`]| `materials_data`  |
//! | `MATERIALS_READY` | [`Submitter`]      | nothing           |
//!
//! Each is deterministic apart from the submission gateway, so they are
//! safe to re-run after a crash.

pub mod evaluate;
pub mod materials;
pub mod normalize;
pub mod plan;
pub mod profile;
pub mod submit;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

pub use evaluate::{Decision, Evaluator, Recommendation};
pub use materials::{Materials, MaterialsWriter};
pub use normalize::{NormalizedJob, Normalizer, RawListing, Seniority};
pub use plan::{ApplicationPlan, Planner};
pub use profile::{CandidateProfile, HardFilters, ResumeInventory};
pub use submit::{LoggingGateway, SubmissionGateway, SubmissionReceipt, Submitter};

use crate::error::{Result, StageError, StageResult};
use crate::machine::PipelineDefinition;
use crate::types::job::{ArtifactField, JobState};

/// The reference stages wired to their states.
pub fn default_definition(
    profile: Arc<CandidateProfile>,
    inventory: Arc<ResumeInventory>,
    gateway: Arc<dyn SubmissionGateway>,
) -> Result<PipelineDefinition> {
    PipelineDefinition::builder()
        .stage(JobState::Discovered, Normalizer::new())
        .stage(JobState::Normalized, Evaluator::new(profile.clone()))
        .stage(JobState::Evaluated, Planner::new(inventory.clone()))
        .stage(JobState::Planned, MaterialsWriter::new(profile, inventory))
        .stage(JobState::MaterialsReady, Submitter::new(gateway))
        .build()
}

pub(crate) fn to_artifact<T: Serialize>(field: ArtifactField, value: &T) -> StageResult<Value> {
    serde_json::to_value(value).map_err(|source| StageError::InvalidArtifact {
        field: field.column(),
        source,
    })
}
