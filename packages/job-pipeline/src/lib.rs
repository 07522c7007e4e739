//! Resumable Job-Application Pipeline
//!
//! Advances each discovered job posting through a fixed sequence of stages
//! (normalize, evaluate, plan, generate materials, submit), persisting every
//! step so that a crash or restart at any point resumes without redoing
//! completed work.
//!
//! # Design Philosophy
//!
//! **"The store is the checkpoint"**
//!
//! - One row per job, one column per stage artifact
//! - State and artifact are committed together through a compare-and-set
//! - Artifact columns are append-only; states only move forward
//! - Stages are plain trait objects with no access to the store
//! - Running the pipeline again is always safe
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use job_pipeline::{JobPipeline, PipelineConfig, SqliteStore};
//! use job_pipeline::sources::FixedSource;
//! use job_pipeline::stages::{default_definition, LoggingGateway};
//!
//! let store = SqliteStore::new("sqlite:jobs.db").await?;
//! let definition = default_definition(profile, inventory, Arc::new(LoggingGateway))?;
//! let pipeline = JobPipeline::new(store, definition, PipelineConfig::default());
//!
//! pipeline.ingest_from(&[&FixedSource::demo()]).await?;
//! let report = pipeline.run_until_quiescent().await?;
//! pipeline.close().await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core trait abstractions (JobStore, Stage, Source)
//! - [`types`] - Job records, states, summaries and configuration
//! - [`machine`] - Pipeline definition and transition rules
//! - [`pipeline`] - Ingestion, pass runner and the `JobPipeline` driver
//! - [`stores`] - Storage implementations (MemoryStore, SqliteStore)
//! - [`stages`] - Reference stages for the job-application domain
//! - [`sources`] - Posting sources (fixed list, JSON file, HTTP feed)
//! - [`testing`] - Scripted stages for testing

pub mod error;
pub mod machine;
pub mod pipeline;
pub mod sources;
pub mod stages;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{PipelineError, Result, SourceError, StageError, StageResult};
pub use machine::{PipelineDefinition, PipelineDefinitionBuilder, StateMachine, Transition};
pub use pipeline::{IngestResult, JobPipeline, Runner};
pub use traits::{
    source::Source,
    stage::{Stage, StageOutcome},
    store::{JobStore, UpdateOutcome},
};
pub use types::{
    posting_id, Artifact, ArtifactField, Artifacts, JobOutcome, JobRecord, JobState,
    PipelineConfig, QuiescenceReport, RawPosting, RetryPolicy, RunSummary,
};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;
