//! Plan stage: decide whether and how to apply.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::evaluate::{Decision, Recommendation};
use super::normalize::NormalizedJob;
use super::profile::ResumeInventory;
use super::to_artifact;
use crate::error::StageResult;
use crate::traits::stage::{Stage, StageOutcome};
use crate::types::job::{ArtifactField, Artifacts};

/// Default minimum match score for applying.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeStrategy {
    pub use_core: bool,
    /// Module names to put on top of the core résumé
    pub highlight_modules: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverLetterPlan {
    pub required: bool,
    pub style: String,
}

/// How submission should proceed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationLevel {
    #[default]
    Manual,
    Assisted,
    Full,
}

/// Planning artifact stored in `plan_data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationPlan {
    pub apply: bool,
    pub resume_strategy: ResumeStrategy,
    pub cover_letter: CoverLetterPlan,
    pub automation_level: AutomationLevel,
}

/// Turns an evaluation into an application plan.
pub struct Planner {
    inventory: Arc<ResumeInventory>,
    threshold: f64,
}

impl Planner {
    pub fn new(inventory: Arc<ResumeInventory>) -> Self {
        Self {
            inventory,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// The plan, or the reason for not applying.
    pub fn plan(&self, job: &NormalizedJob, decision: &Decision) -> Result<ApplicationPlan, String> {
        if !decision.pass_hard_filter {
            return Err("hard filter not passed".to_string());
        }
        if decision.recommendation != Recommendation::Apply {
            return Err(format!("recommendation is {}", decision.recommendation));
        }
        if decision.match_score < self.threshold {
            return Err(format!(
                "match score {:.2} below threshold {:.2}",
                decision.match_score, self.threshold
            ));
        }

        let wanted: HashSet<String> = job
            .keywords
            .iter()
            .chain(&decision.strengths)
            .map(|k| k.to_lowercase())
            .collect();
        let highlight_modules = self
            .inventory
            .module_names()
            .filter(|name| wanted.contains(&name.to_lowercase()))
            .map(str::to_string)
            .collect();

        Ok(ApplicationPlan {
            apply: true,
            resume_strategy: ResumeStrategy {
                use_core: true,
                highlight_modules,
            },
            cover_letter: CoverLetterPlan {
                required: true,
                style: "formal".to_string(),
            },
            automation_level: AutomationLevel::Manual,
        })
    }
}

#[async_trait]
impl Stage for Planner {
    fn name(&self) -> &str {
        "plan"
    }

    async fn process(&self, artifacts: &Artifacts) -> StageResult<StageOutcome> {
        let job: NormalizedJob = artifacts.decode(ArtifactField::Normalized)?;
        let decision: Decision = artifacts.decode(ArtifactField::Decision)?;

        match self.plan(&job, &decision) {
            Ok(plan) => Ok(StageOutcome::advance(to_artifact(ArtifactField::Plan, &plan)?)),
            Err(reason) => Ok(StageOutcome::reject(format!("not applying: {reason}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::normalize::Seniority;

    fn job() -> NormalizedJob {
        NormalizedJob {
            title: "Data Scientist".into(),
            company: "Acme".into(),
            location: "remote".into(),
            employment_type: None,
            seniority: Seniority::Unknown,
            keywords: vec!["python".into(), "cloud".into()],
            source_url: String::new(),
        }
    }

    fn decision(score: f64, recommendation: Recommendation) -> Decision {
        Decision {
            match_score: score,
            pass_hard_filter: true,
            strengths: vec!["rna-seq".into()],
            gaps: vec![],
            risk_flags: vec![],
            recommendation,
        }
    }

    fn planner() -> Planner {
        let inventory = ResumeInventory::new("core")
            .with_module("Python", "Built pipelines")
            .with_module("rna-seq", "Sequenced things")
            .with_module("leadership", "Led a team");
        Planner::new(Arc::new(inventory))
    }

    #[test]
    fn test_highlights_modules_matching_keywords_or_strengths() {
        let plan = planner()
            .plan(&job(), &decision(0.9, Recommendation::Apply))
            .unwrap();

        assert!(plan.apply);
        assert_eq!(plan.resume_strategy.highlight_modules, vec!["Python", "rna-seq"]);
        assert_eq!(plan.automation_level, AutomationLevel::Manual);
    }

    #[test]
    fn test_human_review_is_not_applied() {
        let reason = planner()
            .plan(&job(), &decision(0.6, Recommendation::HumanReview))
            .unwrap_err();
        assert_eq!(reason, "recommendation is human_review");
    }

    #[test]
    fn test_threshold_is_enforced() {
        let reason = planner()
            .with_threshold(0.95)
            .plan(&job(), &decision(0.9, Recommendation::Apply))
            .unwrap_err();
        assert!(reason.contains("below threshold"));
    }
}
