//! Ingestion: insert discovered postings in the initial state.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::traits::source::Source;
use crate::traits::store::JobStore;
use crate::types::posting::RawPosting;

/// Result of an ingest operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestResult {
    /// Postings offered for insertion
    pub received: usize,

    /// Rows created in `DISCOVERED`
    pub inserted: usize,

    /// Postings whose id already had a row (including repeats in one batch)
    pub duplicates: usize,

    /// Sources whose fetch failed
    pub failed_sources: Vec<String>,
}

impl IngestResult {
    /// Create a new empty result.
    pub fn new() -> Self {
        Self {
            received: 0,
            inserted: 0,
            duplicates: 0,
            failed_sources: Vec::new(),
        }
    }

    /// Check if every source was fetched.
    pub fn is_success(&self) -> bool {
        self.failed_sources.is_empty()
    }

    fn merge(&mut self, other: IngestResult) {
        self.received += other.received;
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.failed_sources.extend(other.failed_sources);
    }
}

impl Default for IngestResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Insert postings that are not yet stored.
///
/// Existing rows are never touched, whatever state they are in.
pub async fn ingest<S, I>(store: &S, postings: I) -> Result<IngestResult>
where
    S: JobStore + ?Sized,
    I: IntoIterator<Item = RawPosting>,
{
    let mut result = IngestResult::new();

    for posting in postings {
        result.received += 1;
        let (job_id, raw_data) = posting.into_parts();

        if store.put_new(&job_id, &raw_data).await? {
            debug!(job_id = %job_id, "posting ingested");
            result.inserted += 1;
        } else {
            result.duplicates += 1;
        }
    }

    info!(
        received = result.received,
        inserted = result.inserted,
        duplicates = result.duplicates,
        "ingest complete"
    );
    Ok(result)
}

/// Fetch from every source and ingest what they return.
///
/// A failing source is logged and recorded; the remaining sources are still
/// ingested.
pub async fn ingest_from_sources<S>(store: &S, sources: &[&dyn Source]) -> Result<IngestResult>
where
    S: JobStore + ?Sized,
{
    let mut result = IngestResult::new();

    for source in sources {
        match source.fetch().await {
            Ok(postings) => {
                debug!(source = source.name(), postings = postings.len(), "source fetched");
                result.merge(ingest(store, postings).await?);
            }
            Err(e) => {
                warn!(source = source.name(), error = %e, "source fetch failed");
                result.failed_sources.push(source.name().to_string());
            }
        }
    }

    Ok(result)
}
