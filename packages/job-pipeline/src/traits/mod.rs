//! Core trait abstractions for the pipeline.
//!
//! These traits define the seams applications plug into: where records
//! live, what each stage does, and where postings come from.

pub mod source;
pub mod stage;
pub mod store;
