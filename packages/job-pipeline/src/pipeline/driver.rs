//! `JobPipeline`: the public entry point tying store, machine and runner.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Result;
use crate::machine::{PipelineDefinition, StateMachine};
use crate::pipeline::ingest::{ingest, ingest_from_sources, IngestResult};
use crate::pipeline::runner::Runner;
use crate::traits::source::Source;
use crate::traits::store::JobStore;
use crate::types::config::PipelineConfig;
use crate::types::job::{JobRecord, JobState};
use crate::types::posting::RawPosting;
use crate::types::summary::{QuiescenceReport, RunSummary};

/// A resumable pipeline over one store.
///
/// Every call reads its work from the store, so a fresh `JobPipeline` over
/// the same database picks up exactly where a crashed one stopped.
///
/// # Example
///
/// ```rust,ignore
/// use job_pipeline::{JobPipeline, PipelineConfig, MemoryStore};
///
/// let pipeline = JobPipeline::new(MemoryStore::new(), definition, PipelineConfig::default());
/// pipeline.ingest(postings).await?;
/// let report = pipeline.run_until_quiescent().await?;
/// println!("advanced {} jobs", report.totals.advanced);
/// pipeline.close().await?;
/// ```
pub struct JobPipeline<S: JobStore> {
    store: Arc<S>,
    runner: Runner<S>,
}

impl<S: JobStore> JobPipeline<S> {
    pub fn new(store: S, definition: PipelineDefinition, config: PipelineConfig) -> Self {
        Self::with_shared_store(Arc::new(store), definition, config)
    }

    /// Build over a store handle shared with other callers.
    pub fn with_shared_store(
        store: Arc<S>,
        definition: PipelineDefinition,
        config: PipelineConfig,
    ) -> Self {
        let machine = Arc::new(StateMachine::new(definition, config.retry));
        let runner = Runner::new(store.clone(), machine, config);
        Self { store, runner }
    }

    /// Stop passes when `cancel` fires instead of the pipeline's own token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.runner = self.runner.with_cancellation(cancel);
        self
    }

    /// Insert postings not yet stored.
    pub async fn ingest<I>(&self, postings: I) -> Result<IngestResult>
    where
        I: IntoIterator<Item = RawPosting>,
    {
        ingest(self.store.as_ref(), postings).await
    }

    /// Fetch from each source and ingest the results.
    pub async fn ingest_from(&self, sources: &[&dyn Source]) -> Result<IngestResult> {
        ingest_from_sources(self.store.as_ref(), sources).await
    }

    /// Run a single pass.
    pub async fn run_once(&self) -> Result<RunSummary> {
        self.runner.run_once().await
    }

    /// Run passes until quiescent, bounded by the configured pass limit.
    pub async fn run_until_quiescent(&self) -> Result<QuiescenceReport> {
        self.run_until_quiescent_with(self.runner.config().max_passes)
            .await
    }

    /// Run passes until quiescent, bounded by `max_passes`.
    pub async fn run_until_quiescent_with(&self, max_passes: usize) -> Result<QuiescenceReport> {
        self.runner.run_until_quiescent(max_passes).await
    }

    /// Token that cancels the current and future passes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.runner.cancellation_token()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        self.runner.config()
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        self.store.get(job_id).await
    }

    /// Row counts per state.
    pub async fn status(&self) -> Result<BTreeMap<JobState, usize>> {
        self.store.count_by_state().await
    }

    /// Release the store.
    pub async fn close(self) -> Result<()> {
        info!("closing pipeline");
        self.store.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::MemoryStore;
    use crate::testing::StageSet;
    use serde_json::json;

    #[tokio::test]
    async fn test_status_counts_each_state() {
        let stages = StageSet::advancing();
        let pipeline = JobPipeline::new(
            MemoryStore::new(),
            stages.definition(),
            PipelineConfig::default(),
        );
        pipeline
            .ingest([
                RawPosting::new("a", json!({})),
                RawPosting::new("b", json!({})),
            ])
            .await
            .unwrap();
        pipeline.run_once().await.unwrap();

        let status = pipeline.status().await.unwrap();
        assert_eq!(status.get(&JobState::Normalized), Some(&2));
        assert_eq!(status.get(&JobState::Discovered), None);

        pipeline.close().await.unwrap();
    }
}
