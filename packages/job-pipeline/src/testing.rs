//! Testing utilities including scripted stage implementations.
//!
//! These make it possible to drive the state machine and runner through
//! every outcome (advance, reject, retry, fatal, panic, timeout) without the
//! reference collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{StageError, StageResult};
use crate::machine::{PipelineDefinition, PipelineDefinitionBuilder};
use crate::traits::stage::{Stage, StageOutcome};
use crate::types::job::{Artifacts, JobState};

/// One scripted response.
#[derive(Debug, Clone)]
enum Scripted {
    Outcome(StageOutcome),
    Error(String),
}

impl Scripted {
    fn into_result(self) -> StageResult<StageOutcome> {
        match self {
            Scripted::Outcome(outcome) => Ok(outcome),
            Scripted::Error(message) => Err(StageError::other(message)),
        }
    }
}

/// A stage that replays queued responses, then a fallback.
///
/// Responses can be queued globally or per job id. Every invocation is
/// recorded for assertions.
pub struct ScriptedStage {
    name: String,

    /// Responses consumed in order by any job
    queue: Arc<RwLock<VecDeque<Scripted>>>,

    /// Responses consumed in order by one job
    per_job: Arc<RwLock<HashMap<String, VecDeque<Scripted>>>>,

    /// Response once the queues are drained
    fallback: Scripted,

    /// Job ids this stage was invoked for
    calls: Arc<RwLock<Vec<String>>>,
}

impl ScriptedStage {
    /// A stage that advances with `{"stage": <name>}`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let fallback = Scripted::Outcome(StageOutcome::advance(json!({ "stage": name })));
        Self {
            name,
            queue: Arc::default(),
            per_job: Arc::default(),
            fallback,
            calls: Arc::default(),
        }
    }

    /// A stage that always advances with `artifact`.
    pub fn advancing(name: impl Into<String>, artifact: Value) -> Self {
        Self::new(name).with_fallback(StageOutcome::advance(artifact))
    }

    /// Replace the fallback response.
    pub fn with_fallback(mut self, outcome: StageOutcome) -> Self {
        self.fallback = Scripted::Outcome(outcome);
        self
    }

    /// Queue an outcome for the next invocation.
    pub fn then(self, outcome: StageOutcome) -> Self {
        self.queue
            .write()
            .unwrap()
            .push_back(Scripted::Outcome(outcome));
        self
    }

    /// Queue an `Err` for the next invocation.
    pub fn then_error(self, message: impl Into<String>) -> Self {
        self.queue
            .write()
            .unwrap()
            .push_back(Scripted::Error(message.into()));
        self
    }

    /// Queue an outcome for the next invocation on `job_id`.
    pub fn for_job(self, job_id: impl Into<String>, outcome: StageOutcome) -> Self {
        self.per_job
            .write()
            .unwrap()
            .entry(job_id.into())
            .or_default()
            .push_back(Scripted::Outcome(outcome));
        self
    }

    /// Job ids this stage has been invoked for, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Number of times this stage ran for `job_id`.
    pub fn calls_for(&self, job_id: &str) -> usize {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == job_id)
            .count()
    }

    fn next_response(&self, job_id: &str) -> Scripted {
        if let Some(queued) = self
            .per_job
            .write()
            .unwrap()
            .get_mut(job_id)
            .and_then(|queue| queue.pop_front())
        {
            return queued;
        }
        self.queue
            .write()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, artifacts: &Artifacts) -> StageResult<StageOutcome> {
        self.calls.write().unwrap().push(artifacts.job_id.clone());
        self.next_response(&artifacts.job_id).into_result()
    }
}

/// A stage that panics, optionally only for selected jobs.
pub struct PanickingStage {
    name: String,
    only: Option<Vec<String>>,
}

impl PanickingStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            only: None,
        }
    }

    /// Panic only for these job ids; advance every other job.
    pub fn only_for<I, S>(mut self, job_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(job_ids.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl Stage for PanickingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, artifacts: &Artifacts) -> StageResult<StageOutcome> {
        let targeted = self
            .only
            .as_ref()
            .map_or(true, |ids| ids.contains(&artifacts.job_id));
        if targeted {
            panic!("{} exploded on {}", self.name, artifacts.job_id);
        }
        Ok(StageOutcome::advance(json!({ "stage": self.name })))
    }
}

/// A stage that sleeps before advancing.
pub struct SlowStage {
    name: String,
    delay: Duration,
    outcome: Option<StageOutcome>,
}

impl SlowStage {
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            outcome: None,
        }
    }

    /// Return `outcome` after the delay instead of advancing.
    pub fn with_outcome(mut self, outcome: StageOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _artifacts: &Artifacts) -> StageResult<StageOutcome> {
        tokio::time::sleep(self.delay).await;
        Ok(self
            .outcome
            .clone()
            .unwrap_or_else(|| StageOutcome::advance(json!({ "stage": self.name, "slow": true }))))
    }
}

/// Five scripted stages covering every non-terminal state.
#[derive(Clone)]
pub struct StageSet {
    pub normalize: Arc<ScriptedStage>,
    pub evaluate: Arc<ScriptedStage>,
    pub plan: Arc<ScriptedStage>,
    pub materials: Arc<ScriptedStage>,
    pub submit: Arc<ScriptedStage>,
}

impl StageSet {
    /// Stages that advance every job all the way to `SUBMITTED`.
    pub fn advancing() -> Self {
        Self {
            normalize: Arc::new(ScriptedStage::advancing(
                "normalize",
                json!({"title": "Engineer", "keywords": ["rust"]}),
            )),
            evaluate: Arc::new(ScriptedStage::advancing(
                "evaluate",
                json!({"match_score": 0.9, "recommendation": "apply"}),
            )),
            plan: Arc::new(ScriptedStage::advancing(
                "plan",
                json!({"apply": true, "highlights": []}),
            )),
            materials: Arc::new(ScriptedStage::advancing(
                "materials",
                json!({"resume": "...", "cover_letter": "..."}),
            )),
            submit: Arc::new(ScriptedStage::advancing(
                "submit",
                json!({"submitted": true}),
            )),
        }
    }

    /// Builder with all five stages registered; override entries before
    /// building.
    pub fn builder(&self) -> PipelineDefinitionBuilder {
        PipelineDefinition::builder()
            .stage_arc(JobState::Discovered, self.normalize.clone())
            .stage_arc(JobState::Normalized, self.evaluate.clone())
            .stage_arc(JobState::Evaluated, self.plan.clone())
            .stage_arc(JobState::Planned, self.materials.clone())
            .stage_arc(JobState::MaterialsReady, self.submit.clone())
    }

    pub fn definition(&self) -> PipelineDefinition {
        self.builder()
            .build()
            .expect("stage set covers every active state")
    }

    /// The scripted stage registered for `state`.
    pub fn for_state(&self, state: JobState) -> Option<&Arc<ScriptedStage>> {
        match state {
            JobState::Discovered => Some(&self.normalize),
            JobState::Normalized => Some(&self.evaluate),
            JobState::Evaluated => Some(&self.plan),
            JobState::Planned => Some(&self.materials),
            JobState::MaterialsReady => Some(&self.submit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::job::JobRecord;

    #[tokio::test]
    async fn test_scripted_stage_replays_queue_then_fallback() {
        let stage = ScriptedStage::new("normalize")
            .then(StageOutcome::retry("rate limited"))
            .then_error("socket closed");
        let artifacts = JobRecord::new("j1", json!({})).artifacts();

        assert_eq!(
            stage.process(&artifacts).await.unwrap(),
            StageOutcome::retry("rate limited")
        );
        assert!(stage.process(&artifacts).await.is_err());
        assert!(matches!(
            stage.process(&artifacts).await.unwrap(),
            StageOutcome::Advance(_)
        ));
        assert_eq!(stage.calls_for("j1"), 3);
    }

    #[tokio::test]
    async fn test_per_job_script_takes_priority() {
        let stage = ScriptedStage::new("evaluate").for_job("j2", StageOutcome::reject("no"));

        let j1 = JobRecord::new("j1", json!({})).artifacts();
        let j2 = JobRecord::new("j2", json!({})).artifacts();
        assert!(matches!(stage.process(&j1).await.unwrap(), StageOutcome::Advance(_)));
        assert!(matches!(
            stage.process(&j2).await.unwrap(),
            StageOutcome::Reject { .. }
        ));
        assert_eq!(stage.calls(), vec!["j1", "j2"]);
    }
}
