//! Pass execution.
//!
//! A pass lists the active jobs, runs each through its stage with bounded
//! concurrency and commits the resulting transition. Stage failures stay
//! inside their job; only a store failure aborts the pass.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::machine::{StateMachine, Transition};
use crate::traits::store::JobStore;
use crate::types::config::PipelineConfig;
use crate::types::job::JobRecord;
use crate::types::summary::{JobOutcome, QuiescenceReport, RunSummary};

/// Runs passes of the state machine over a store.
pub struct Runner<S: JobStore> {
    store: Arc<S>,
    machine: Arc<StateMachine>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl<S: JobStore> Runner<S> {
    pub fn new(store: Arc<S>, machine: Arc<StateMachine>, config: PipelineConfig) -> Self {
        Self {
            store,
            machine,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the runner between jobs.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one pass over every active job.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails. Jobs already committed in
    /// this pass stay committed; the rest are picked up by the next pass.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let pass_id = Uuid::new_v4();
        let span = info_span!("pipeline_pass", %pass_id);

        async move {
            let jobs = self.store.list_active().await?;
            info!(jobs = jobs.len(), workers = self.config.workers, "pass started");

            let mut summary = RunSummary::new();
            let mut outcomes = stream::iter(jobs)
                .map(|job| self.process_job(job))
                .buffer_unordered(self.config.workers.max(1));

            while let Some(outcome) = outcomes.next().await {
                match outcome {
                    Ok(outcome) => summary.record(&outcome),
                    Err(e) => {
                        error!(error = %e, "store failure, aborting pass");
                        return Err(e);
                    }
                }
            }

            info!(
                advanced = summary.advanced,
                rejected = summary.rejected,
                failed = summary.failed,
                retried = summary.retried,
                conflicts = summary.conflicts,
                cancelled = summary.cancelled,
                "pass finished"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Repeat passes until one advances nothing or `max_passes` is reached.
    ///
    /// Stops early, without error, once the cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if `max_passes` is zero, and any
    /// store error from a pass.
    pub async fn run_until_quiescent(&self, max_passes: usize) -> Result<QuiescenceReport> {
        if max_passes == 0 {
            return Err(PipelineError::Config(
                "max_passes must be at least 1".to_string(),
            ));
        }
        let mut report = QuiescenceReport::default();

        while report.passes < max_passes {
            if self.cancel.is_cancelled() {
                info!(passes = report.passes, "cancelled, stopping");
                return Ok(report);
            }

            let summary = self.run_once().await?;
            report.passes += 1;
            report.totals.merge(&summary);

            if summary.advanced == 0 {
                info!(passes = report.passes, "pipeline quiescent");
                return Ok(report);
            }
        }

        report.pass_limit_reached = true;
        warn!(passes = report.passes, "pass limit reached before quiescence");
        Ok(report)
    }

    /// Run one job's stage and commit the result.
    async fn process_job(&self, job: JobRecord) -> Result<JobOutcome> {
        let job_id = job.job_id.clone();
        let state = job.state;

        if self.cancel.is_cancelled() {
            debug!(job_id = %job_id, state = %state, "skipped, pass cancelled");
            return Ok(JobOutcome::Cancelled { job_id, state });
        }

        let span = info_span!("job", job_id = %job_id, state = %state);
        async move {
            let outcome = self.machine.execute(&job, self.config.stage_timeout).await;
            debug!(outcome = outcome.kind(), "stage returned");
            if let Some(output) = StateMachine::unpersisted_output(state, &outcome) {
                info!(output = %output, "stage output not stored");
            }

            let transition = self
                .machine
                .apply_retry_policy(&job, StateMachine::transition(state, outcome));

            let committed = self
                .machine
                .commit(self.store.as_ref(), &job, &transition)
                .await;
            let committed = match committed {
                Ok(committed) => committed,
                Err(PipelineError::JobNotFound { .. }) => {
                    warn!("row vanished during pass, treating as conflict");
                    return Ok(JobOutcome::Conflict { job_id, state });
                }
                Err(e) => return Err(e),
            };

            if !committed.is_applied() {
                warn!("row moved by another worker, result discarded");
                return Ok(JobOutcome::Conflict { job_id, state });
            }

            let outcome = match transition {
                Transition::Advance { from, to, .. } => {
                    info!(to = %to, "advanced");
                    JobOutcome::Advanced { job_id, from, to }
                }
                Transition::Reject { from, reason, .. } => {
                    info!(reason = %reason, "rejected");
                    JobOutcome::Rejected { job_id, from }
                }
                Transition::Retry { state, reason } => {
                    info!(reason = %reason, attempt = job.attempts + 1, "will retry next pass");
                    JobOutcome::Retried {
                        job_id,
                        state,
                        reason,
                    }
                }
                Transition::Fail { from, reason } => JobOutcome::Failed {
                    job_id,
                    from,
                    reason,
                },
            };
            Ok(outcome)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::MemoryStore;
    use crate::testing::StageSet;
    use crate::traits::stage::StageOutcome;
    use crate::types::config::RetryPolicy;
    use crate::types::job::JobState;
    use serde_json::json;

    fn runner(store: Arc<MemoryStore>, stages: &StageSet) -> Runner<MemoryStore> {
        let machine = StateMachine::new(stages.definition(), RetryPolicy::default());
        Runner::new(store, Arc::new(machine), PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_run_once_advances_each_job_one_step() {
        let store = Arc::new(MemoryStore::new());
        store.put_new("a", &json!({})).await.unwrap();
        store.put_new("b", &json!({})).await.unwrap();
        let stages = StageSet::advancing();

        let summary = runner(store.clone(), &stages).run_once().await.unwrap();

        assert_eq!(summary.advanced, 2);
        for id in ["a", "b"] {
            let job = store.get(id).await.unwrap().unwrap();
            assert_eq!(job.state, JobState::Normalized);
            assert!(job.normalized_data.is_some());
        }
        assert_eq!(stages.evaluate.call_count(), 0);
    }

    #[tokio::test]
    async fn test_run_until_quiescent_reaches_submitted() {
        let store = Arc::new(MemoryStore::new());
        store.put_new("a", &json!({})).await.unwrap();
        let stages = StageSet::advancing();

        let report = runner(store.clone(), &stages)
            .run_until_quiescent(20)
            .await
            .unwrap();

        assert_eq!(report.totals.advanced, 5);
        // five advancing passes plus the empty one that detects quiescence
        assert_eq!(report.passes, 6);
        assert!(!report.pass_limit_reached);
        let job = store.get("a").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Submitted);
        assert!(job.materials_data.is_some());
    }

    #[tokio::test]
    async fn test_pass_limit_is_reported() {
        let store = Arc::new(MemoryStore::new());
        store.put_new("a", &json!({})).await.unwrap();

        let report = runner(store, &StageSet::advancing())
            .run_until_quiescent(2)
            .await
            .unwrap();

        assert_eq!(report.passes, 2);
        assert!(report.pass_limit_reached);
    }

    #[tokio::test]
    async fn test_zero_pass_limit_is_a_config_error() {
        let store = Arc::new(MemoryStore::new());
        store.put_new("a", &json!({})).await.unwrap();
        let stages = StageSet::advancing();

        let err = runner(store.clone(), &stages)
            .run_until_quiescent(0)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Config(_)));
        assert_eq!(stages.normalize.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fatal_outcome_fails_only_that_job() {
        let store = Arc::new(MemoryStore::new());
        store.put_new("a", &json!({})).await.unwrap();
        store.put_new("b", &json!({})).await.unwrap();
        let stages = StageSet {
            normalize: Arc::new(
                crate::testing::ScriptedStage::new("normalize")
                    .for_job("b", StageOutcome::fatal("unparseable posting")),
            ),
            ..StageSet::advancing()
        };

        let summary = runner(store.clone(), &stages).run_once().await.unwrap();

        assert_eq!(summary.advanced, 1);
        assert_eq!(summary.failed, 1);
        let b = store.get("b").await.unwrap().unwrap();
        assert_eq!(b.state, JobState::Failed);
        assert_eq!(b.last_error.as_deref(), Some("unparseable posting"));
    }

    #[tokio::test]
    async fn test_cancelled_pass_skips_every_job() {
        let store = Arc::new(MemoryStore::new());
        store.put_new("a", &json!({})).await.unwrap();
        let stages = StageSet::advancing();
        let runner = runner(store.clone(), &stages);
        runner.cancellation_token().cancel();

        let summary = runner.run_once().await.unwrap();

        assert_eq!(summary.cancelled, 1);
        assert_eq!(stages.normalize.call_count(), 0);
        let job = store.get("a").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Discovered);
    }
}
