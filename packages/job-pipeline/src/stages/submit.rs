//! Submit stage and the gateway it submits through.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::materials::Materials;
use super::normalize::NormalizedJob;
use crate::error::{StageError, StageResult};
use crate::traits::stage::{Stage, StageOutcome};
use crate::types::job::{ArtifactField, Artifacts};

/// Proof of submission returned by a gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub gateway: String,
    pub submitted_at: DateTime<Utc>,
    pub reference: Option<String>,
}

/// Where applications are sent.
///
/// `confirm` gates submission on an approval; returning `false` parks the
/// job until a later pass. Errors from either call are retried.
#[async_trait]
pub trait SubmissionGateway: Send + Sync {
    async fn confirm(&self, job_id: &str, job: &NormalizedJob) -> StageResult<bool>;

    async fn submit(
        &self,
        job_id: &str,
        job: &NormalizedJob,
        materials: &Materials,
    ) -> StageResult<SubmissionReceipt>;
}

/// Gateway that confirms everything and records submissions in the log.
#[derive(Debug, Default)]
pub struct LoggingGateway;

#[async_trait]
impl SubmissionGateway for LoggingGateway {
    async fn confirm(&self, job_id: &str, _job: &NormalizedJob) -> StageResult<bool> {
        info!(job_id, "auto-confirming submission");
        Ok(true)
    }

    async fn submit(
        &self,
        job_id: &str,
        job: &NormalizedJob,
        materials: &Materials,
    ) -> StageResult<SubmissionReceipt> {
        info!(
            job_id,
            company = %job.company,
            title = %job.title,
            resume_chars = materials.resume.chars().count(),
            cover_letter_chars = materials.cover_letter.chars().count(),
            "application submitted"
        );
        Ok(SubmissionReceipt {
            gateway: "logging".to_string(),
            submitted_at: Utc::now(),
            reference: (!job.source_url.is_empty()).then(|| job.source_url.clone()),
        })
    }
}

/// Stage for `MATERIALS_READY` jobs.
pub struct Submitter {
    gateway: Arc<dyn SubmissionGateway>,
}

impl Submitter {
    pub fn new(gateway: Arc<dyn SubmissionGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Stage for Submitter {
    fn name(&self) -> &str {
        "submit"
    }

    async fn process(&self, artifacts: &Artifacts) -> StageResult<StageOutcome> {
        let job: NormalizedJob = artifacts.decode(ArtifactField::Normalized)?;
        let materials: Materials = artifacts.decode(ArtifactField::Materials)?;

        if !self.gateway.confirm(&artifacts.job_id, &job).await? {
            return Ok(StageOutcome::retry("awaiting confirmation"));
        }

        let receipt = self
            .gateway
            .submit(&artifacts.job_id, &job, &materials)
            .await?;
        let receipt = serde_json::to_value(receipt).map_err(|source| StageError::InvalidArtifact {
            field: "receipt",
            source,
        })?;
        Ok(StageOutcome::advance(receipt))
    }
}
