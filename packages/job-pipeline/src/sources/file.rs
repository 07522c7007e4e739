use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::parse_listings;
use crate::error::SourceResult;
use crate::traits::source::Source;
use crate::types::posting::RawPosting;

/// Listings read from a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    name: String,
    path: PathBuf,
}

impl JsonFileSource {
    /// Source named after the file stem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("file")
            .to_string();
        Self { name, path }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl Source for JsonFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> SourceResult<Vec<RawPosting>> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        debug!(path = %self.path.display(), bytes = text.len(), "read postings file");
        parse_listings(&self.name, serde_json::from_str(&text)?)
    }
}
