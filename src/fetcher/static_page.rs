use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use tracing::debug;

use crate::config::USER_AGENT;
use crate::error::{FetchError, Result};
use crate::fetcher::PageFetcher;

/// One GET per page with a desktop browser identity.
pub struct StaticFetcher {
    client: reqwest::Client,
}

impl StaticFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(
        &self,
        url: &str,
        _ready_marker: Option<&str>,
    ) -> std::result::Result<String, FetchError> {
        debug!(url, "GET page");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::unreachable(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::unreachable(url, format!("HTTP {status}")));
        }

        response.text().await.map_err(|e| FetchError::unreachable(url, e))
    }
}
