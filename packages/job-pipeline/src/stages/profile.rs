//! Candidate profile and résumé inventory.

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};

/// The candidate's preferences and requirements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateProfile {
    pub target_titles: Vec<String>,

    /// Skills every good match must mention
    pub must_have: Vec<String>,

    pub nice_to_have: Vec<String>,

    pub hard_filters: HardFilters,

    /// Free-form weights; carried through but not scored
    pub soft_preferences: HashMap<String, f64>,
}

/// Constraints a posting must satisfy to be considered at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardFilters {
    /// Allowed locations, compared case-insensitively. Empty allows any.
    pub location: Vec<String>,
}

impl CandidateProfile {
    /// Load a profile from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            PipelineError::Config(format!("cannot read profile {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Whether `location` passes the location filter.
    pub fn allows_location(&self, location: &str) -> bool {
        let filter = &self.hard_filters.location;
        filter.is_empty()
            || filter
                .iter()
                .any(|allowed| allowed.to_lowercase() == location.to_lowercase())
    }
}

/// The base résumé plus named highlight modules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeInventory {
    pub core_resume: String,

    /// Module name (file stem) to module text, sorted by name
    pub modules: IndexMap<String, String>,
}

impl ResumeInventory {
    pub fn new(core_resume: impl Into<String>) -> Self {
        Self {
            core_resume: core_resume.into(),
            modules: IndexMap::new(),
        }
    }

    pub fn with_module(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.modules.insert(name.into(), text.into());
        self
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Load the core résumé and every `.md`/`.txt` file in `modules_dir`.
    ///
    /// A missing modules directory yields an inventory with no modules.
    pub async fn load(core_path: impl AsRef<Path>, modules_dir: impl AsRef<Path>) -> Result<Self> {
        let core_path = core_path.as_ref();
        let core_resume = tokio::fs::read_to_string(core_path).await.map_err(|e| {
            PipelineError::Config(format!("cannot read résumé {}: {e}", core_path.display()))
        })?;

        let modules_dir = modules_dir.as_ref();
        let mut modules = Vec::new();
        if tokio::fs::metadata(modules_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            let mut entries = tokio::fs::read_dir(modules_dir)
                .await
                .map_err(|e| PipelineError::Config(format!("cannot list {}: {e}", modules_dir.display())))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| PipelineError::Config(e.to_string()))?
            {
                let path = entry.path();
                let is_module = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| matches!(ext.to_lowercase().as_str(), "md" | "txt"))
                    .unwrap_or(false);
                let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if !is_module {
                    continue;
                }

                let text = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| PipelineError::Config(format!("cannot read {}: {e}", path.display())))?;
                modules.push((name.to_string(), text.trim().to_string()));
            }
        }
        modules.sort_by(|a, b| a.0.cmp(&b.0));
        debug!(modules = modules.len(), "résumé inventory loaded");

        Ok(Self {
            core_resume,
            modules: modules.into_iter().collect(),
        })
    }
}
