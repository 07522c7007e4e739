//! State machine: stage mapping, transition rules and commit.
//!
//! The machine is monotonic. A job only moves forward one state at a time or
//! sideways into a terminal label, and artifact columns are append-only.
//! Resuming after a crash therefore needs no bookkeeping: re-list the active
//! jobs and run whatever stage each one is parked in.
//!
//! # Key Properties
//!
//! - **Pure decisions**: [`StateMachine::transition`] maps a state and a stage
//!   outcome to a [`Transition`] without IO
//! - **Contained stages**: [`StateMachine::execute`] turns stage errors,
//!   panics and timeouts into retryable outcomes
//! - **Guarded commits**: [`StateMachine::commit`] writes through the store's
//!   compare-and-set, so a lost race surfaces as `Conflict`

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::error::{PipelineError, Result, StageError};
use crate::traits::stage::{Stage, StageOutcome};
use crate::traits::store::{JobStore, UpdateOutcome};
use crate::types::config::RetryPolicy;
use crate::types::job::{Artifact, ArtifactField, JobRecord, JobState};

/// Mapping from each non-terminal state to the stage that advances it.
///
/// Built explicitly and handed to the machine, so several pipeline
/// configurations can coexist in one process.
#[derive(Clone)]
pub struct PipelineDefinition {
    stages: HashMap<JobState, Arc<dyn Stage>>,
}

impl PipelineDefinition {
    pub fn builder() -> PipelineDefinitionBuilder {
        PipelineDefinitionBuilder::default()
    }

    /// Stage registered for `state`.
    pub fn stage(&self, state: JobState) -> Option<&Arc<dyn Stage>> {
        self.stages.get(&state)
    }
}

impl std::fmt::Debug for PipelineDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut stages: Vec<_> = self
            .stages
            .iter()
            .map(|(state, stage)| (*state, stage.name().to_string()))
            .collect();
        stages.sort();
        f.debug_struct("PipelineDefinition")
            .field("stages", &stages)
            .finish()
    }
}

/// Builder for [`PipelineDefinition`].
#[derive(Default)]
pub struct PipelineDefinitionBuilder {
    stages: HashMap<JobState, Arc<dyn Stage>>,
}

impl PipelineDefinitionBuilder {
    /// Register the stage that runs for jobs parked in `state`.
    pub fn stage(self, state: JobState, stage: impl Stage + 'static) -> Self {
        self.stage_arc(state, Arc::new(stage))
    }

    /// Register a shared stage.
    pub fn stage_arc(mut self, state: JobState, stage: Arc<dyn Stage>) -> Self {
        self.stages.insert(state, stage);
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Fails if a terminal state has a stage or a non-terminal state lacks one.
    pub fn build(self) -> Result<PipelineDefinition> {
        if let Some(state) = self.stages.keys().find(|s| s.is_terminal()) {
            return Err(PipelineError::Config(format!(
                "terminal state {state} cannot have a stage"
            )));
        }

        let missing: Vec<_> = JobState::ACTIVE
            .into_iter()
            .filter(|state| !self.stages.contains_key(state))
            .map(|state| state.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::Config(format!(
                "no stage registered for {}",
                missing.join(", ")
            )));
        }

        Ok(PipelineDefinition {
            stages: self.stages,
        })
    }
}

/// What the store should do with a job after its stage ran.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Move forward, writing `artifact` if the state owns a column.
    Advance {
        from: JobState,
        to: JobState,
        artifact: Option<Artifact>,
    },
    /// Park in `REJECTED`, writing the decision artifact if the rejecting
    /// state owns the decision column.
    Reject {
        from: JobState,
        reason: String,
        artifact: Option<Artifact>,
    },
    /// Leave the job in place for the next pass.
    Retry { state: JobState, reason: String },
    /// Park in `FAILED`.
    Fail { from: JobState, reason: String },
}

/// The pipeline's transition logic bound to a stage mapping.
pub struct StateMachine {
    definition: PipelineDefinition,
    retry: RetryPolicy,
}

impl StateMachine {
    pub fn new(definition: PipelineDefinition, retry: RetryPolicy) -> Self {
        Self { definition, retry }
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Compute the transition for a stage outcome in `state`.
    ///
    /// Pure: no IO and no retry accounting.
    pub fn transition(state: JobState, outcome: StageOutcome) -> Transition {
        match outcome {
            StageOutcome::Advance(value) => match state.next() {
                Some(to) => Transition::Advance {
                    from: state,
                    to,
                    artifact: state.owned_field().map(|field| Artifact::new(field, value)),
                },
                None => Transition::Fail {
                    from: state,
                    reason: format!("no state after {state}"),
                },
            },
            StageOutcome::Reject { reason, artifact } => {
                let artifact = match state.owned_field() {
                    Some(ArtifactField::Decision) => Some(Artifact::new(
                        ArtifactField::Decision,
                        decision_with_reason(artifact, &reason),
                    )),
                    _ => None,
                };
                Transition::Reject {
                    from: state,
                    reason,
                    artifact,
                }
            }
            StageOutcome::RetryableError(reason) => Transition::Retry { state, reason },
            StageOutcome::FatalError(reason) => Transition::Fail {
                from: state,
                reason,
            },
        }
    }

    /// Escalate a retry to a failure once the job's budget is spent.
    pub fn apply_retry_policy(&self, job: &JobRecord, transition: Transition) -> Transition {
        match transition {
            Transition::Retry { state, reason } => {
                let attempt = job.attempts.saturating_add(1);
                if self.retry.is_exhausted(attempt) {
                    Transition::Fail {
                        from: state,
                        reason: format!("retry budget exhausted after {attempt} attempts: {reason}"),
                    }
                } else {
                    Transition::Retry { state, reason }
                }
            }
            other => other,
        }
    }

    /// Run the stage for `job`'s current state.
    ///
    /// Never fails: stage errors, panics and timeouts all become
    /// `RetryableError` so that one misbehaving job cannot take down a pass.
    pub async fn execute(&self, job: &JobRecord, timeout: Duration) -> StageOutcome {
        let Some(stage) = self.definition.stage(job.state) else {
            return StageOutcome::fatal(format!("no stage registered for {}", job.state));
        };

        let artifacts = job.artifacts();
        let guarded = AssertUnwindSafe(stage.process(&artifacts)).catch_unwind();

        let error = match tokio::time::timeout(timeout, guarded).await {
            Ok(Ok(Ok(outcome))) => return outcome,
            Ok(Ok(Err(e))) => e,
            Ok(Err(panic)) => StageError::Panicked(panic_message(panic.as_ref())),
            Err(_) => StageError::Timeout(timeout),
        };

        warn!(
            job_id = %job.job_id,
            state = %job.state,
            stage = stage.name(),
            error = %error,
            "stage failed unexpectedly, treating as retryable"
        );
        StageOutcome::retry(format!("{}: {}", stage.name(), error))
    }

    /// Stage output that no column will hold.
    ///
    /// Only the `MATERIALS_READY` stage advances without an owned field; its
    /// value (the submission receipt) is returned here so callers can log it.
    pub fn unpersisted_output(state: JobState, outcome: &StageOutcome) -> Option<&serde_json::Value> {
        match outcome {
            StageOutcome::Advance(value) if state.owned_field().is_none() => Some(value),
            _ => None,
        }
    }

    /// Persist a transition through the store's compare-and-set.
    ///
    /// `job` is the row as the runner read it. Retries and failures are
    /// guarded on its `attempts` as well as its state.
    pub async fn commit<S: JobStore + ?Sized>(
        &self,
        store: &S,
        job: &JobRecord,
        transition: &Transition,
    ) -> Result<UpdateOutcome> {
        let job_id = job.job_id.as_str();
        let outcome = match transition {
            Transition::Advance { from, to, artifact } => {
                store.update(job_id, *from, *to, artifact.as_ref()).await?
            }
            Transition::Reject { from, artifact, .. } => {
                store
                    .update(job_id, *from, JobState::Rejected, artifact.as_ref())
                    .await?
            }
            Transition::Retry { state, reason } => {
                store
                    .record_retry(job_id, *state, job.attempts, reason)
                    .await?
            }
            Transition::Fail { from, reason } => {
                error!(job_id, state = %from, reason = %reason, "job failed");
                store
                    .mark_failed(job_id, *from, job.attempts, reason)
                    .await?
            }
        };

        debug!(job_id, ?outcome, "transition committed");
        Ok(outcome)
    }
}

/// Decision artifact for a rejection at the evaluation stage.
fn decision_with_reason(artifact: Option<serde_json::Value>, reason: &str) -> serde_json::Value {
    match artifact {
        Some(serde_json::Value::Object(mut map)) => {
            map.entry("verdict").or_insert_with(|| json!("reject"));
            map.entry("reason").or_insert_with(|| json!(reason));
            serde_json::Value::Object(map)
        }
        Some(other) => json!({"verdict": "reject", "reason": reason, "detail": other}),
        None => json!({"verdict": "reject", "reason": reason}),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{PanickingStage, ScriptedStage, SlowStage, StageSet};
    use proptest::prelude::*;
    use serde_json::json;

    fn job_in(state: JobState) -> JobRecord {
        let mut job = JobRecord::new("j1", json!({"title": "Engineer"}));
        job.state = state;
        job
    }

    #[test]
    fn test_advance_writes_owned_field() {
        let t = StateMachine::transition(JobState::Evaluated, StageOutcome::advance(json!({"apply": true})));
        assert_eq!(
            t,
            Transition::Advance {
                from: JobState::Evaluated,
                to: JobState::Planned,
                artifact: Some(Artifact::new(ArtifactField::Plan, json!({"apply": true}))),
            }
        );
    }

    #[test]
    fn test_advance_to_submitted_has_no_field() {
        let t = StateMachine::transition(
            JobState::MaterialsReady,
            StageOutcome::advance(json!({"receipt": "ok"})),
        );
        assert!(matches!(
            t,
            Transition::Advance {
                to: JobState::Submitted,
                artifact: None,
                ..
            }
        ));
    }

    #[test]
    fn test_submission_output_is_surfaced_not_stored() {
        let receipt = StageOutcome::advance(json!({"reference": "abc"}));
        assert_eq!(
            StateMachine::unpersisted_output(JobState::MaterialsReady, &receipt),
            Some(&json!({"reference": "abc"}))
        );
        assert!(StateMachine::unpersisted_output(JobState::Planned, &receipt).is_none());
        assert!(
            StateMachine::unpersisted_output(JobState::MaterialsReady, &StageOutcome::retry("x"))
                .is_none()
        );
    }

    #[test]
    fn test_reject_at_evaluation_records_decision() {
        let t = StateMachine::transition(JobState::Normalized, StageOutcome::reject("skills mismatch"));
        let Transition::Reject { artifact, .. } = t else {
            panic!("expected reject");
        };
        assert_eq!(
            artifact,
            Some(Artifact::new(
                ArtifactField::Decision,
                json!({"verdict": "reject", "reason": "skills mismatch"})
            ))
        );
    }

    #[test]
    fn test_reject_keeps_scored_decision() {
        let t = StateMachine::transition(
            JobState::Normalized,
            StageOutcome::reject_with("low score", json!({"match_score": 0.1})),
        );
        let Transition::Reject { artifact: Some(artifact), .. } = t else {
            panic!("expected reject with artifact");
        };
        assert_eq!(artifact.value["match_score"], json!(0.1));
        assert_eq!(artifact.value["reason"], json!("low score"));
    }

    #[test]
    fn test_reject_outside_evaluation_writes_nothing() {
        let t = StateMachine::transition(
            JobState::Evaluated,
            StageOutcome::reject_with("not applying", json!({"apply": false})),
        );
        assert!(matches!(t, Transition::Reject { artifact: None, .. }));
    }

    #[test]
    fn test_retry_budget_escalates() {
        let machine = StateMachine::new(StageSet::advancing().definition(), RetryPolicy::bounded(3));
        let mut job = job_in(JobState::Evaluated);
        let retry = Transition::Retry {
            state: JobState::Evaluated,
            reason: "timeout".into(),
        };

        job.attempts = 1;
        assert!(matches!(
            machine.apply_retry_policy(&job, retry.clone()),
            Transition::Retry { .. }
        ));

        job.attempts = 2;
        let escalated = machine.apply_retry_policy(&job, retry);
        let Transition::Fail { reason, .. } = escalated else {
            panic!("expected failure");
        };
        assert!(reason.contains("after 3 attempts"));
    }

    #[test]
    fn test_builder_requires_every_active_state() {
        let err = PipelineDefinition::builder()
            .stage(JobState::Discovered, ScriptedStage::advancing("normalize", json!({})))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("NORMALIZED"));
    }

    #[test]
    fn test_builder_rejects_terminal_stage() {
        let err = StageSet::advancing()
            .builder()
            .stage(JobState::Submitted, ScriptedStage::advancing("extra", json!({})))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("SUBMITTED"));
    }

    #[tokio::test]
    async fn test_execute_converts_error_to_retry() {
        let stages = StageSet {
            normalize: Arc::new(ScriptedStage::new("normalize").then_error("connection reset")),
            ..StageSet::advancing()
        };
        let machine = StateMachine::new(stages.definition(), RetryPolicy::default());

        let outcome = machine
            .execute(&job_in(JobState::Discovered), Duration::from_secs(5))
            .await;
        assert!(matches!(outcome, StageOutcome::RetryableError(r) if r.contains("connection reset")));
    }

    #[tokio::test]
    async fn test_execute_contains_panics() {
        let machine = StateMachine::new(
            StageSet::advancing()
                .builder()
                .stage(JobState::Planned, PanickingStage::new("materials"))
                .build()
                .unwrap(),
            RetryPolicy::default(),
        );

        let outcome = machine
            .execute(&job_in(JobState::Planned), Duration::from_secs(5))
            .await;
        assert!(matches!(outcome, StageOutcome::RetryableError(r) if r.contains("panicked")));
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let machine = StateMachine::new(
            StageSet::advancing()
                .builder()
                .stage(
                    JobState::Evaluated,
                    SlowStage::new("plan", Duration::from_secs(60)),
                )
                .build()
                .unwrap(),
            RetryPolicy::default(),
        );

        let outcome = machine
            .execute(&job_in(JobState::Evaluated), Duration::from_millis(20))
            .await;
        assert!(matches!(outcome, StageOutcome::RetryableError(r) if r.contains("timed out")));
    }

    fn any_active_state() -> impl Strategy<Value = JobState> {
        prop::sample::select(JobState::ACTIVE.to_vec())
    }

    fn any_outcome() -> impl Strategy<Value = StageOutcome> {
        prop_oneof![
            Just(StageOutcome::advance(json!({"ok": true}))),
            Just(StageOutcome::reject("no")),
            Just(StageOutcome::reject_with("no", json!({"score": 0}))),
            Just(StageOutcome::retry("later")),
            Just(StageOutcome::fatal("broken")),
        ]
    }

    proptest! {
        #[test]
        fn prop_transitions_are_monotonic(state in any_active_state(), outcome in any_outcome()) {
            match StateMachine::transition(state, outcome) {
                Transition::Advance { from, to, artifact } => {
                    prop_assert_eq!(from, state);
                    prop_assert!(to.rank() > from.rank());
                    prop_assert!(from.can_transition_to(to));
                    if let Some(artifact) = artifact {
                        prop_assert_eq!(Some(artifact.field), from.owned_field());
                    }
                }
                Transition::Reject { from, artifact, .. } => {
                    prop_assert!(from.can_transition_to(JobState::Rejected));
                    if let Some(artifact) = artifact {
                        prop_assert_eq!(artifact.field, ArtifactField::Decision);
                    }
                }
                Transition::Retry { state: stayed, .. } => prop_assert_eq!(stayed, state),
                Transition::Fail { from, .. } => {
                    prop_assert!(from.can_transition_to(JobState::Failed));
                }
            }
        }
    }
}
