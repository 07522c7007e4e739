//! Data types shared by stores, stages and the runner.

pub mod config;
pub mod job;
pub mod posting;
pub mod summary;

pub use config::{PipelineConfig, RetryPolicy};
pub use job::{Artifact, ArtifactField, Artifacts, JobRecord, JobState};
pub use posting::{posting_id, RawPosting};
pub use summary::{JobOutcome, QuiescenceReport, RunSummary};
