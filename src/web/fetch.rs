//! Raw content fetcher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};

use super::search::request_error;
use crate::error::ServiceError;

/// User agent sent with every fetch.
pub const USER_AGENT: &str = concat!("KnowledgeForge/", env!("CARGO_PKG_VERSION"));

/// Fetches the raw bytes behind a URL.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch_raw(&self, url: &str) -> Result<Vec<u8>, ServiceError>;
}

/// HTTP(S) fetcher with a bounded per-request timeout.
pub struct HttpFetcher {
    timeout: Duration,
    http_client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ServiceError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ServiceError::ClientBuild(e.to_string()))?;
        Ok(Self {
            timeout,
            http_client,
        })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch_raw(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
        let parsed = Url::parse(url).map_err(|_| ServiceError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ServiceError::InvalidUrl(url.to_string()));
        }

        let response = self
            .http_client
            .get(parsed)
            .send()
            .await
            .map_err(|e| request_error(url, e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| request_error(url, e, self.timeout))?;
        Ok(bytes.to_vec())
    }
}
