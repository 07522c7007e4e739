//! Pipeline orchestration.
//!
//! - Ingest flow (source → dedupe → store in `DISCOVERED`)
//! - Pass execution (list active → run stage → commit transition)
//! - The `JobPipeline` driver over both

pub mod driver;
pub mod ingest;
pub mod runner;

pub use driver::JobPipeline;
pub use ingest::{ingest, ingest_from_sources, IngestResult};
pub use runner::Runner;
