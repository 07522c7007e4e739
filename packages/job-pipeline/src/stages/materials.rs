//! Materials stage: tailored résumé and cover letter.

use std::sync::Arc;

use async_trait::async_trait;
use regex::{NoExpand, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::normalize::NormalizedJob;
use super::plan::ApplicationPlan;
use super::profile::{CandidateProfile, ResumeInventory};
use super::to_artifact;
use crate::error::{StageError, StageResult};
use crate::traits::stage::{Stage, StageOutcome};
use crate::types::job::{ArtifactField, Artifacts};

/// Materials artifact stored in `materials_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Materials {
    pub resume: String,
    pub cover_letter: String,
    pub highlight_modules: Vec<String>,
}

/// Put highlight texts on top and upper-case job keywords found in the résumé.
pub fn tailor_resume(core: &str, highlights: &[&str], keywords: &[String]) -> StageResult<String> {
    let mut resume = core.to_string();
    for keyword in keywords.iter().filter(|k| !k.is_empty()) {
        let pattern = RegexBuilder::new(&regex::escape(keyword))
            .case_insensitive(true)
            .build()
            .map_err(|e| StageError::Other(Box::new(e)))?;
        if pattern.is_match(&resume) {
            resume = pattern
                .replace_all(&resume, NoExpand(&keyword.to_uppercase()))
                .into_owned();
        }
    }

    let highlights: Vec<&str> = highlights.iter().copied().filter(|h| !h.is_empty()).collect();
    if highlights.is_empty() {
        Ok(resume)
    } else {
        Ok(format!("{}\n\n{}", highlights.join("\n\n"), resume))
    }
}

/// Three-paragraph cover letter built from the candidate's facts.
pub fn write_cover_letter(job: &NormalizedJob, facts: &[String]) -> String {
    let facts = facts.join(", ");
    let opening = format!(
        "Dear Hiring Committee,\n\n\
         I am writing to apply for the {} position at {}. \
         With a background in {} I would be glad to contribute to your team.\n",
        job.title, job.company, facts
    );
    let body = format!(
        "My experience lines up with the core requirements of this role. \
         In particular, I bring hands-on proficiency in {facts}, \
         which matches the qualifications you describe.\n"
    );
    let closing = format!(
        "The work {} does is what draws me to this opening, \
         and I believe my skills and values would fit your team well. \
         Thank you for considering my application.\n\nSincerely,\nCandidate",
        job.company
    );
    [opening, body, closing].join("\n")
}

/// Stage for `PLANNED` jobs.
pub struct MaterialsWriter {
    profile: Arc<CandidateProfile>,
    inventory: Arc<ResumeInventory>,
}

impl MaterialsWriter {
    pub fn new(profile: Arc<CandidateProfile>, inventory: Arc<ResumeInventory>) -> Self {
        Self { profile, inventory }
    }

    pub fn write(&self, job: &NormalizedJob, plan: &ApplicationPlan) -> StageResult<Materials> {
        let highlight_modules = plan.resume_strategy.highlight_modules.clone();
        let highlights: Vec<&str> = highlight_modules
            .iter()
            .map(|name| {
                self.inventory
                    .modules
                    .get(name)
                    .map(String::as_str)
                    .unwrap_or_default()
            })
            .collect();

        Ok(Materials {
            resume: tailor_resume(&self.inventory.core_resume, &highlights, &job.keywords)?,
            cover_letter: write_cover_letter(job, &self.profile.must_have),
            highlight_modules,
        })
    }
}

#[async_trait]
impl Stage for MaterialsWriter {
    fn name(&self) -> &str {
        "materials"
    }

    async fn process(&self, artifacts: &Artifacts) -> StageResult<StageOutcome> {
        let job: NormalizedJob = artifacts.decode(ArtifactField::Normalized)?;
        let plan: ApplicationPlan = artifacts.decode(ArtifactField::Plan)?;

        if !plan.apply {
            return Ok(StageOutcome::reject("plan does not apply"));
        }

        let materials = self.write(&job, &plan)?;
        Ok(StageOutcome::advance(to_artifact(ArtifactField::Materials, &materials)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::normalize::Seniority;

    fn job() -> NormalizedJob {
        NormalizedJob {
            title: "Bioinformatics Scientist".into(),
            company: "Acme Genomics".into(),
            location: "Boston, MA".into(),
            employment_type: None,
            seniority: Seniority::Unknown,
            keywords: vec!["python".into(), "cloud".into()],
            source_url: String::new(),
        }
    }

    #[test]
    fn test_keywords_are_uppercased_and_highlights_prepended() {
        let resume = tailor_resume(
            "Wrote Python and more python.\nUsed Cloud tools.",
            &["Led genomics work"],
            &["python".into(), "cloud".into(), "rust".into()],
        )
        .unwrap();

        assert_eq!(
            resume,
            "Led genomics work\n\nWrote PYTHON and more PYTHON.\nUsed CLOUD tools."
        );
    }

    #[test]
    fn test_keywords_are_literal() {
        let resume = tailor_resume("c++ and c", &[], &["c++".into()]).unwrap();
        assert_eq!(resume, "C++ and c");
    }

    #[test]
    fn test_cover_letter_has_three_paragraphs() {
        let letter = write_cover_letter(&job(), &["python".into(), "rna-seq".into()]);

        assert!(letter.starts_with("Dear Hiring Committee,"));
        assert!(letter.contains("position at Acme Genomics"));
        assert!(letter.contains("python, rna-seq"));
        assert!(letter.ends_with("Sincerely,\nCandidate"));
    }

    #[tokio::test]
    async fn test_missing_plan_is_an_error() {
        let writer = MaterialsWriter::new(
            Arc::new(CandidateProfile::default()),
            Arc::new(ResumeInventory::new("core")),
        );
        let artifacts = Artifacts {
            job_id: "j1".into(),
            raw: serde_json::json!({}),
            normalized: Some(serde_json::to_value(job()).unwrap()),
            decision: None,
            plan: None,
            materials: None,
        };

        let err = writer.process(&artifacts).await.unwrap_err();
        assert!(matches!(err, StageError::MissingArtifact(ArtifactField::Plan)));
    }
}
