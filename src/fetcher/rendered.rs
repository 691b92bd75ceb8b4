use std::time::Duration;

use async_trait::async_trait;
use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::USER_AGENT;
use crate::error::{AppError, FetchError, Result};
use crate::fetcher::PageFetcher;

/// Headless Chrome driven over WebDriver. One session per run.
pub struct RenderedFetcher {
    client: Client,
    wait: Duration,
}

impl RenderedFetcher {
    pub async fn connect(webdriver_url: &str, wait: Duration) -> Result<Self> {
        let mut caps = serde_json::Map::new();
        caps.insert(
            "goog:chromeOptions".to_string(),
            json!({
                "args": [
                    "--headless=new",
                    "--disable-gpu",
                    "--no-sandbox",
                    "--window-size=1920,1080",
                    format!("--user-agent={USER_AGENT}"),
                ]
            }),
        );

        let mut builder = ClientBuilder::native();
        builder.capabilities(caps);
        let client = builder
            .connect(webdriver_url)
            .await
            .map_err(|e| AppError::Fetch(FetchError::unreachable(webdriver_url, e)))?;

        info!("Browser session opened via {webdriver_url}");
        Ok(Self { client, wait })
    }
}

#[async_trait]
impl PageFetcher for RenderedFetcher {
    async fn fetch(
        &self,
        url: &str,
        ready_marker: Option<&str>,
    ) -> std::result::Result<String, FetchError> {
        debug!(url, marker = ?ready_marker, "Rendering page");
        self.client
            .goto(url)
            .await
            .map_err(|e| FetchError::unreachable(url, e))?;

        if let Some(marker) = ready_marker {
            match self
                .client
                .wait()
                .at_most(self.wait)
                .for_element(Locator::Css(marker))
                .await
            {
                Ok(_) => {}
                Err(CmdError::WaitTimeout) => {
                    debug!(url, marker, "Marker never appeared");
                    return Err(FetchError::NoMoreContent { url: url.to_string() });
                }
                Err(e) => return Err(FetchError::unreachable(url, e)),
            }
        }

        self.client
            .source()
            .await
            .map_err(|e| FetchError::unreachable(url, e))
    }

    async fn close(&self) -> Result<()> {
        if let Err(e) = self.client.clone().close().await {
            warn!("Browser session did not close cleanly: {e}");
        }
        Ok(())
    }
}
