use async_trait::async_trait;
use serde_json::{json, Value};

use super::parse_listings;
use crate::error::SourceResult;
use crate::traits::source::Source;
use crate::types::posting::RawPosting;

/// A source over an in-memory list of listings.
#[derive(Debug, Clone)]
pub struct FixedSource {
    name: String,
    listings: Vec<Value>,
}

impl FixedSource {
    pub fn new(name: impl Into<String>, listings: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            listings,
        }
    }

    /// One hard-coded posting, for demos and offline runs.
    pub fn demo() -> Self {
        Self::new(
            "demo",
            vec![json!({
                "title": "Senior Bioinformatics Scientist",
                "company": "Acme Genomics",
                "location": "Boston, MA",
                "employment_type": "Full-time",
                "description": "We are seeking a senior bioinformatics scientist with strong \
                    Python skills, experience in RNA-seq data analysis, and familiarity \
                    with cloud computing.",
                "source_url": "https://example.com/jobs/123"
            })],
        )
    }
}

#[async_trait]
impl Source for FixedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> SourceResult<Vec<RawPosting>> {
        parse_listings(&self.name, Value::Array(self.listings.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_ids_are_stable() {
        let first = FixedSource::demo().fetch().await.unwrap();
        let second = FixedSource::demo().fetch().await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        assert!(first[0].job_id.starts_with("demo:"));
    }
}
