//! Evaluate stage: score a normalized job against the candidate profile.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::normalize::NormalizedJob;
use super::profile::CandidateProfile;
use super::to_artifact;
use crate::error::StageResult;
use crate::traits::stage::{Stage, StageOutcome};
use crate::types::job::{ArtifactField, Artifacts};

const APPLY_SCORE: f64 = 0.7;
const REVIEW_SCORE: f64 = 0.4;
const LOW_MATCH_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Apply,
    HumanReview,
    Skip,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Recommendation::Apply => "apply",
            Recommendation::HumanReview => "human_review",
            Recommendation::Skip => "skip",
        })
    }
}

/// Evaluation artifact stored in `decision_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Share of must-have skills found, rounded to two decimals
    pub match_score: f64,
    pub pass_hard_filter: bool,
    pub strengths: Vec<String>,
    pub gaps: Vec<String>,
    pub risk_flags: Vec<String>,
    pub recommendation: Recommendation,
}

impl Decision {
    /// Human-readable reason for a skip.
    pub fn skip_reason(&self) -> String {
        if !self.pass_hard_filter {
            "location not allowed by hard filter".to_string()
        } else if self.match_score == 0.0 {
            "no must-have skills matched".to_string()
        } else {
            format!("match score {:.2} below review threshold", self.match_score)
        }
    }
}

/// Rule-based evaluator.
pub struct Evaluator {
    profile: Arc<CandidateProfile>,
}

impl Evaluator {
    pub fn new(profile: Arc<CandidateProfile>) -> Self {
        Self { profile }
    }

    pub fn evaluate(&self, job: &NormalizedJob) -> Decision {
        let keywords: HashSet<String> = job.keywords.iter().map(|k| k.to_lowercase()).collect();

        let mut strengths = Vec::new();
        let mut gaps = Vec::new();
        for term in self.profile.must_have.iter().map(|t| t.to_lowercase()) {
            if term_variations(&term).iter().any(|v| keywords.contains(v)) {
                strengths.push(term);
            } else {
                gaps.push(term);
            }
        }

        let score = if self.profile.must_have.is_empty() {
            1.0
        } else {
            strengths.len() as f64 / self.profile.must_have.len() as f64
        };
        let pass_hard_filter = self.profile.allows_location(&job.location);

        let mut risk_flags = Vec::new();
        if job
            .employment_type
            .as_deref()
            .is_some_and(|t| t.to_lowercase().contains("contract"))
        {
            risk_flags.push("contract".to_string());
        }
        if score < LOW_MATCH_SCORE {
            risk_flags.push("low_match".to_string());
        }

        let recommendation = if !pass_hard_filter || score == 0.0 {
            Recommendation::Skip
        } else if score >= APPLY_SCORE {
            Recommendation::Apply
        } else if score >= REVIEW_SCORE {
            Recommendation::HumanReview
        } else {
            Recommendation::Skip
        };

        Decision {
            match_score: (score * 100.0).round() / 100.0,
            pass_hard_filter,
            strengths,
            gaps,
            risk_flags,
            recommendation,
        }
    }
}

/// A must-have term plus its hyphen-free and per-part spellings.
fn term_variations(term: &str) -> Vec<String> {
    let mut variations = vec![term.to_string()];
    if term.contains('-') {
        variations.push(term.replace('-', ""));
        variations.extend(
            term.split('-')
                .filter(|part| !part.is_empty())
                .map(str::to_string),
        );
    }
    variations
}

#[async_trait]
impl Stage for Evaluator {
    fn name(&self) -> &str {
        "evaluate"
    }

    async fn process(&self, artifacts: &Artifacts) -> StageResult<StageOutcome> {
        let job: NormalizedJob = artifacts.decode(ArtifactField::Normalized)?;
        let decision = self.evaluate(&job);
        let artifact = to_artifact(ArtifactField::Decision, &decision)?;

        if decision.recommendation == Recommendation::Skip {
            return Ok(StageOutcome::reject_with(decision.skip_reason(), artifact));
        }
        Ok(StageOutcome::advance(artifact))
    }
}
