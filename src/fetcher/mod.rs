pub mod rendered;
pub mod static_page;

use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{FetchError, Result};

pub use rendered::RenderedFetcher;
pub use static_page::StaticFetcher;

/// How a site's pages have to be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Plain GET; the listing is in the server response.
    Static,
    /// Browser session; the listing only exists after client-side rendering.
    Rendered,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Load `url` and return its markup.
    ///
    /// `ready_marker` is a CSS selector that must be present before a rendered page
    /// counts as loaded. Fetchers that do not render ignore it.
    async fn fetch(
        &self,
        url: &str,
        ready_marker: Option<&str>,
    ) -> std::result::Result<String, FetchError>;

    /// Release whatever the fetcher holds. Called once at the end of a run.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens a run-scoped fetcher for a fetch mode.
#[async_trait]
pub trait FetcherConnector: Send + Sync {
    async fn open(&self, mode: FetchMode) -> Result<Box<dyn PageFetcher>>;
}

/// Connector backed by real HTTP and a WebDriver endpoint.
#[derive(Debug, Clone)]
pub struct WebConnector {
    webdriver_url: String,
    page_timeout: Duration,
    render_wait: Duration,
}

impl WebConnector {
    pub fn new(webdriver_url: String, page_timeout: Duration, render_wait: Duration) -> Self {
        Self { webdriver_url, page_timeout, render_wait }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.webdriver_url.clone(), cfg.page_timeout, cfg.render_wait)
    }
}

#[async_trait]
impl FetcherConnector for WebConnector {
    async fn open(&self, mode: FetchMode) -> Result<Box<dyn PageFetcher>> {
        match mode {
            FetchMode::Static => Ok(Box::new(StaticFetcher::new(self.page_timeout)?)),
            FetchMode::Rendered => Ok(Box::new(
                RenderedFetcher::connect(&self.webdriver_url, self.render_wait).await?,
            )),
        }
    }
}
