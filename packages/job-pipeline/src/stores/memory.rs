//! In-memory storage implementation for testing and development.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::traits::store::{validate_update, JobStore, UpdateOutcome};
use crate::types::job::{Artifact, JobRecord, JobState};

/// In-memory job store.
///
/// Honours the full compare-and-set contract, so it is a faithful stand-in
/// for tests. Not suitable for production as data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<IndexMap<String, JobRecord>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row directly, bypassing ingestion.
    ///
    /// Lets tests park a job mid-pipeline.
    pub fn insert_record(&self, record: JobRecord) -> Result<()> {
        self.write()?.insert(record.job_id.clone(), record);
        Ok(())
    }

    /// Number of stored rows.
    pub fn job_count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IndexMap<String, JobRecord>>> {
        self.jobs
            .read()
            .map_err(|_| PipelineError::store("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IndexMap<String, JobRecord>>> {
        self.jobs
            .write()
            .map_err(|_| PipelineError::store("memory store lock poisoned"))
    }

    /// Run `mutate` on the row if it is still in `expected` and, when
    /// `attempts` is given, still has that many retries recorded.
    fn compare_and_mutate<F>(
        &self,
        job_id: &str,
        expected: JobState,
        attempts: Option<u32>,
        mutate: F,
    ) -> Result<UpdateOutcome>
    where
        F: FnOnce(&mut JobRecord) -> bool,
    {
        let mut jobs = self.write()?;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| PipelineError::JobNotFound {
                job_id: job_id.to_string(),
            })?;

        if job.state != expected || attempts.is_some_and(|n| job.attempts != n) {
            return Ok(UpdateOutcome::Conflict);
        }

        if !mutate(job) {
            return Ok(UpdateOutcome::Conflict);
        }
        job.updated_at = Utc::now();
        Ok(UpdateOutcome::Applied)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn put_new(&self, job_id: &str, raw_data: &Value) -> Result<bool> {
        let mut jobs = self.write()?;
        if jobs.contains_key(job_id) {
            return Ok(false);
        }
        jobs.insert(job_id.to_string(), JobRecord::new(job_id, raw_data.clone()));
        Ok(true)
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        Ok(self.read()?.get(job_id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<JobRecord>> {
        Ok(self
            .read()?
            .values()
            .filter(|job| job.is_active())
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<JobRecord>> {
        Ok(self.read()?.values().cloned().collect())
    }

    async fn update(
        &self,
        job_id: &str,
        expected: JobState,
        new_state: JobState,
        artifact: Option<&Artifact>,
    ) -> Result<UpdateOutcome> {
        validate_update(expected, new_state, artifact)?;

        self.compare_and_mutate(job_id, expected, None, |job| {
            if let Some(artifact) = artifact {
                let slot = job.artifact_slot(artifact.field);
                if slot.is_some() {
                    return false;
                }
                *slot = Some(artifact.value.clone());
            }
            job.state = new_state;
            job.attempts = 0;
            job.last_error = None;
            true
        })
    }

    async fn record_retry(
        &self,
        job_id: &str,
        expected: JobState,
        attempts: u32,
        reason: &str,
    ) -> Result<UpdateOutcome> {
        self.compare_and_mutate(job_id, expected, Some(attempts), |job| {
            job.attempts = job.attempts.saturating_add(1);
            job.last_error = Some(reason.to_string());
            true
        })
    }

    async fn mark_failed(
        &self,
        job_id: &str,
        expected: JobState,
        attempts: u32,
        reason: &str,
    ) -> Result<UpdateOutcome> {
        validate_update(expected, JobState::Failed, None)?;

        self.compare_and_mutate(job_id, expected, Some(attempts), |job| {
            job.state = JobState::Failed;
            job.last_error = Some(reason.to_string());
            true
        })
    }
}
