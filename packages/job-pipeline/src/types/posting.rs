//! Raw postings as produced by sources.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A posting ready for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPosting {
    /// Stable identifier (`<source>:<identity hash>`)
    pub job_id: String,

    /// Payload exactly as fetched
    pub raw_data: Value,
}

impl RawPosting {
    /// Create a posting with an explicit identifier.
    pub fn new(job_id: impl Into<String>, raw_data: Value) -> Self {
        Self {
            job_id: job_id.into(),
            raw_data,
        }
    }

    /// Create a posting from a board listing, deriving its identifier.
    ///
    /// The identity is the listing's company, title and location; the same
    /// listing fetched again from the same source yields the same id.
    pub fn from_listing(source: &str, raw_data: Value) -> Self {
        let field = |key: &str| {
            raw_data
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string()
        };
        let job_id = posting_id(source, &field("company"), &field("title"), &field("location"));
        Self { job_id, raw_data }
    }

    /// Split into the `(job_id, raw_data)` pair the store takes.
    pub fn into_parts(self) -> (String, Value) {
        (self.job_id, self.raw_data)
    }
}

/// Derive a stable job id from a source name and posting identity.
pub fn posting_id(source: &str, company: &str, title: &str, location: &str) -> String {
    let identity = format!("{company}|{title}|{location}").to_lowercase();
    let digest = hex::encode(Sha256::digest(identity.as_bytes()));
    format!("{}:{}", source, &digest[..32])
}
