//! Web search adapter.
//!
//! The pipeline only needs "query in, result URLs out". [`SearxngClient`]
//! implements that against a SearxNG instance's JSON API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::ServiceError;

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub url: String,
    pub title: Option<String>,
}

impl SearchHit {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
        }
    }
}

/// A web search service. An empty result list is not an error.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ServiceError>;
}

/// Client for a SearxNG instance.
pub struct SearxngClient {
    base_url: String,
    timeout: Duration,
    http_client: Client,
}

#[derive(Debug, Deserialize)]
struct SearxngResponse {
    #[serde(default)]
    results: Vec<SearxngResult>,
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    url: Option<String>,
    title: Option<String>,
}

impl SearxngClient {
    /// Creates a client for the instance at `base_url` (e.g. "http://localhost:8080").
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::ClientBuild(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            http_client,
        })
    }

    /// Builds the JSON search URL for a query.
    pub fn search_url(&self, query: &str) -> String {
        format!(
            "{}/search?q={}&categories=general&language=en-US&format=json",
            self.base_url,
            urlencoding::encode(query)
        )
    }
}

#[async_trait]
impl SearchProvider for SearxngClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ServiceError> {
        let url = self.search_url(query);

        let response = self
            .http_client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| request_error(&url, e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Http {
                url,
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| request_error(&url, e, self.timeout))?;
        let parsed: SearxngResponse =
            serde_json::from_str(&body).map_err(|e| ServiceError::MalformedResponse {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let hits = parsed
            .results
            .into_iter()
            .filter_map(|r| {
                let url = r.url.filter(|u| !u.trim().is_empty())?;
                Some(SearchHit {
                    url,
                    title: r.title,
                })
            })
            .collect();
        Ok(hits)
    }
}

/// Maps a reqwest failure onto the shared service error.
pub(crate) fn request_error(url: &str, err: reqwest::Error, timeout: Duration) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout {
            url: url.to_string(),
            seconds: timeout.as_secs(),
        }
    } else {
        ServiceError::RequestFailed {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url_encodes_query() {
        let client = SearxngClient::new("http://localhost:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.search_url("rust & tokio"),
            "http://localhost:8080/search?q=rust%20%26%20tokio&categories=general&language=en-US&format=json"
        );
    }

    #[test]
    fn test_response_without_results_is_empty() {
        let parsed: SearxngResponse = serde_json::from_str(r#"{"query": "x"}"#).unwrap();
        assert!(parsed.results.is_empty());
    }
}
