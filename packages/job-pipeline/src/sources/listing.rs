//! Listing cleanup applied before postings enter the store.
//!
//! Job boards disagree on key names and leave gaps as `null`. Every source
//! runs its records through [`map_listing`] so the store only ever holds the
//! canonical shape the normalize stage reads.

use serde_json::{Map, Value};

/// Location used when a listing has none.
pub const DEFAULT_LOCATION: &str = "Remote";

/// Canonical field and the keys it is read from, first non-empty wins.
const FIELD_KEYS: [(&str, &[&str]); 7] = [
    ("title", &["title", "job_title"]),
    ("company", &["company", "company_name"]),
    ("location", &["location", "formatted_location", "job_location"]),
    ("employment_type", &["employment_type", "job_type", "type"]),
    ("description", &["description", "job_description", "body", "snippet"]),
    ("source_url", &["job_url", "url", "source_url"]),
    ("source_site", &["site_name", "source", "job_board"]),
];

/// Map a board record onto the canonical listing keys.
///
/// Alias keys are folded into their canonical field, `null` becomes an
/// empty string, a missing location becomes [`DEFAULT_LOCATION`] and a
/// missing employment type stays `null`. Keys the mapping does not know
/// are carried over unchanged.
pub fn map_listing(mut record: Map<String, Value>) -> Value {
    let mut mapped = Map::new();

    for (field, keys) in FIELD_KEYS {
        let candidates: Vec<Value> = keys.iter().filter_map(|key| record.remove(*key)).collect();
        let text = candidates
            .iter()
            .map(clean_value)
            .find(|text| !text.is_empty())
            .unwrap_or_default();

        let value = match field {
            "location" if text.is_empty() => Value::String(DEFAULT_LOCATION.to_string()),
            "employment_type" if text.is_empty() => Value::Null,
            _ => Value::String(text),
        };
        mapped.insert(field.to_string(), value);
    }

    for (key, value) in record {
        mapped.entry(key).or_insert(value);
    }
    Value::Object(mapped)
}

/// Trimmed text of a scalar; `null` is empty.
fn clean_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Value {
        let Value::Object(record) = value else {
            panic!("test records are objects");
        };
        map_listing(record)
    }

    #[test]
    fn test_aliases_fold_into_canonical_keys() {
        let mapped = map(json!({
            "job_title": "Data Engineer ",
            "company_name": "Acme",
            "formatted_location": "Austin, TX",
            "job_type": "fulltime",
            "snippet": "Spark and SQL",
            "job_url": "https://boards.example/1",
            "site_name": "indeed",
            "salary": 120000
        }));

        assert_eq!(mapped["title"], "Data Engineer");
        assert_eq!(mapped["company"], "Acme");
        assert_eq!(mapped["location"], "Austin, TX");
        assert_eq!(mapped["employment_type"], "fulltime");
        assert_eq!(mapped["description"], "Spark and SQL");
        assert_eq!(mapped["source_url"], "https://boards.example/1");
        assert_eq!(mapped["source_site"], "indeed");
        assert_eq!(mapped["salary"], 120000);
        assert!(mapped.get("job_title").is_none());
    }

    #[test]
    fn test_nulls_become_empty_and_location_defaults() {
        let mapped = map(json!({
            "title": "Engineer",
            "company": null,
            "location": null,
            "employment_type": null,
            "description": "   "
        }));

        assert_eq!(mapped["company"], "");
        assert_eq!(mapped["location"], DEFAULT_LOCATION);
        assert_eq!(mapped["employment_type"], Value::Null);
        assert_eq!(mapped["description"], "");
    }

    #[test]
    fn test_canonical_key_wins_over_alias() {
        let mapped = map(json!({"title": "Lead", "job_title": "Ignored", "location": "", "job_location": "Denver"}));
        assert_eq!(mapped["title"], "Lead");
        assert_eq!(mapped["location"], "Denver");
    }
}
