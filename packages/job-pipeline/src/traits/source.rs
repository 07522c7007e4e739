//! Source trait for discovering postings.

use async_trait::async_trait;

use crate::error::SourceResult;
use crate::types::posting::RawPosting;

/// A finite producer of raw postings.
///
/// Output need not be deduplicated; ingestion handles repeats.
#[async_trait]
pub trait Source: Send + Sync {
    /// Name used in logs and as the job id prefix.
    fn name(&self) -> &str;

    /// Fetch the current batch of postings.
    async fn fetch(&self) -> SourceResult<Vec<RawPosting>>;
}
