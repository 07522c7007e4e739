//! Normalize stage: raw listing → structured job.

use std::sync::LazyLock;

use async_trait::async_trait;
use indexmap::IndexSet;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::to_artifact;
use crate::error::StageResult;
use crate::traits::stage::{Stage, StageOutcome};
use crate::types::job::{ArtifactField, Artifacts};

/// A listing as sources deliver it. Every field is optional and `null`
/// reads as absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawListing {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub employment_type: Option<String>,
    pub description: Option<String>,
    pub source_url: Option<String>,
}

/// Broad seniority inferred from the title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seniority {
    Junior,
    Mid,
    Senior,
    Unknown,
}

impl Seniority {
    pub fn from_title(title: &str) -> Self {
        let title = title.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| title.contains(w));

        if has(&["intern", "junior"]) {
            Seniority::Junior
        } else if has(&["senior", "lead", "principal"]) {
            Seniority::Senior
        } else if has(&["manager", "director"]) {
            Seniority::Mid
        } else {
            Seniority::Unknown
        }
    }
}

/// Output of the normalize stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedJob {
    pub title: String,
    pub company: String,
    pub location: String,
    pub employment_type: Option<String>,
    pub seniority: Seniority,
    pub keywords: Vec<String>,
    pub source_url: String,
}

impl NormalizedJob {
    pub fn from_listing(raw: RawListing) -> Self {
        let title = raw.title.unwrap_or_default();
        let location = raw.location.unwrap_or_default();
        let location = location.trim();
        Self {
            title: title.trim().to_string(),
            company: raw.company.unwrap_or_default().trim().to_string(),
            location: if location.is_empty() {
                "remote".to_string()
            } else {
                location.to_string()
            },
            employment_type: raw.employment_type.filter(|t| !t.trim().is_empty()),
            seniority: Seniority::from_title(&title),
            keywords: extract_keywords(&raw.description.unwrap_or_default()),
            source_url: raw.source_url.unwrap_or_default(),
        }
    }
}

static RE_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").unwrap());

/// Lowercased tokens of three or more characters, first occurrence order.
pub fn extract_keywords(description: &str) -> Vec<String> {
    let lowered = description.to_lowercase();
    let keywords: IndexSet<&str> = RE_SEPARATOR
        .split(&lowered)
        .filter(|token| token.chars().count() >= 3)
        .collect();
    keywords.into_iter().map(str::to_string).collect()
}

/// Stage for `DISCOVERED` jobs.
#[derive(Debug, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for Normalizer {
    fn name(&self) -> &str {
        "normalize"
    }

    async fn process(&self, artifacts: &Artifacts) -> StageResult<StageOutcome> {
        // A payload that is not a listing will never parse; retrying cannot help.
        let raw: RawListing = match artifacts.decode_raw() {
            Ok(raw) => raw,
            Err(e) => return Ok(StageOutcome::fatal(e.to_string())),
        };

        let job = NormalizedJob::from_listing(raw);
        Ok(StageOutcome::advance(to_artifact(ArtifactField::Normalized, &job)?))
    }
}
