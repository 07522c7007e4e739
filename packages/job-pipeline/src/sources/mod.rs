//! Posting sources.
//!
//! Sources return listings as JSON objects; ids are derived from each
//! listing's company, title and location so re-fetching is harmless.
//! Every listing passes through [`map_listing`] on the way in.

pub mod file;
pub mod fixed;
pub mod http;
pub mod listing;

use serde_json::Value;

pub use file::JsonFileSource;
pub use fixed::FixedSource;
pub use http::HttpJsonSource;
pub use listing::{map_listing, DEFAULT_LOCATION};

use crate::error::{SourceError, SourceResult};
use crate::types::posting::RawPosting;

/// Turn a feed payload into postings.
///
/// Accepts a bare array of listings or an object with a `jobs` array.
pub fn parse_listings(source: &str, payload: Value) -> SourceResult<Vec<RawPosting>> {
    let listings = match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("jobs") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(SourceError::InvalidPayload(
                    "expected an array of listings or an object with a `jobs` array".into(),
                ))
            }
        },
        other => {
            return Err(SourceError::InvalidPayload(format!(
                "expected an array of listings, got {}",
                kind(&other)
            )))
        }
    };

    listings
        .into_iter()
        .enumerate()
        .map(|(index, listing)| match listing {
            Value::Object(record) => Ok(RawPosting::from_listing(source, map_listing(record))),
            other => Err(SourceError::InvalidPayload(format!(
                "listing {index} is {}, not an object",
                kind(&other)
            ))),
        })
        .collect()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
