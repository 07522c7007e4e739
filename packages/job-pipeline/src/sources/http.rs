use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::parse_listings;
use crate::error::{SourceError, SourceResult};
use crate::traits::source::Source;
use crate::types::posting::RawPosting;

/// Listings fetched with a GET from a JSON feed.
pub struct HttpJsonSource {
    client: reqwest::Client,
    name: String,
    url: String,
}

impl HttpJsonSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), name, url)
    }

    /// Share a client (connection pool) across sources.
    pub fn with_client(client: reqwest::Client, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Source for HttpJsonSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> SourceResult<Vec<RawPosting>> {
        let resp = self.client.get(&self.url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let payload: Value = resp.json().await?;
        debug!(url = %self.url, "fetched feed");
        parse_listings(&self.name, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn feed(body: ResponseTemplate) -> (MockServer, HttpJsonSource) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs"))
            .respond_with(body)
            .expect(1)
            .mount(&server)
            .await;
        let source = HttpJsonSource::new("feed", format!("{}/jobs", server.uri()));
        (server, source)
    }

    #[tokio::test]
    async fn test_fetches_jobs_object() {
        let body = ResponseTemplate::new(200).set_body_json(json!({
            "jobs": [
                {"title": "Engineer", "company": "Acme", "location": "Remote"},
                {"job_title": "Analyst", "company_name": "Acme", "location": null}
            ]
        }));
        let (_server, source) = feed(body).await;

        let postings = source.fetch().await.unwrap();

        assert_eq!(postings.len(), 2);
        assert!(postings.iter().all(|p| p.job_id.starts_with("feed:")));
        assert_eq!(postings[1].raw_data["title"], "Analyst");
        assert_eq!(postings[1].raw_data["location"], "Remote");
    }

    #[tokio::test]
    async fn test_error_status_maps_to_api_error() {
        let body = ResponseTemplate::new(503).set_body_string("maintenance");
        let (_server, source) = feed(body).await;

        let err = source.fetch().await.unwrap_err();

        match err {
            SourceError::Api { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_array_body_is_invalid_payload() {
        let body = ResponseTemplate::new(200).set_body_json(json!({"count": 3}));
        let (_server, source) = feed(body).await;

        let err = source.fetch().await.unwrap_err();

        assert!(matches!(err, SourceError::InvalidPayload(_)));
    }
}
