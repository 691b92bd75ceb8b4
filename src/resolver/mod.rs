//! Retail price lookup through an image-understanding model.
//!
//! For each lot the resolver downloads the lot photo, asks the model for the
//! closest comparable retail listing and parses a `PRICE, URL` reply. Calls are
//! throttled per key by [`CredentialPool`]; a failing key is rotated out and the
//! lot retried with the next one. Once every key has failed for a lot, lookups
//! stay off for the rest of the run.

pub mod credentials;
pub mod gemini;

use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RATE_LIMIT_BACKOFF_SECS;
use crate::error::{FetchError, ModelError};
use crate::progress::{ProgressSink, Severity};
use crate::types::RetailQuote;

pub use credentials::CredentialPool;
pub use gemini::{GeminiClient, HttpImageFetcher};

static REPLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d,]+\.?\d*)\s*,\s*(https?://\S+)").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ImageData, FetchError>;
}

#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Sends one prompt plus image with `credential` and returns the raw reply text.
    async fn ask(&self, credential: &str, prompt: &str, image: &ImageData) -> Result<String, ModelError>;
}

pub fn build_prompt(title: &str) -> String {
    format!(
        "Task: identify the item in the image, listed at auction as '{title}', and find its \
         current retail price with a direct product link.\n\
         Output format: reply ONLY with `PRICE, URL`, for example `199.99, https://www.amazon.com/dp/B000000000`.\n\
         Rules:\n\
         1. When the exact item cannot be found, use the closest comparable item sold by a major \
         retailer (Amazon, Walmart, Home Depot, Target). Never answer \"not found\" or \"none\".\n\
         2. PRICE is a plain number without currency symbols.\n\
         3. URL must point at a retail listing, never an auction site.\n\
         Nothing else may appear in the reply."
    )
}

/// Pulls `PRICE, URL` out of a model reply, tolerating surrounding chatter,
/// thousands separators and trailing punctuation on the link.
pub fn parse_reply(reply: &str) -> Option<RetailQuote> {
    let caps = REPLY.captures(reply.trim())?;
    let price = Decimal::from_str(&caps[1].replace(',', "")).ok()?;
    let link = caps[2]
        .trim_end_matches(['`', '.', ',', ')', ']', '"', '\''])
        .to_string();
    Some(RetailQuote { price: price.round_dp(2), source_link: link })
}

pub struct RetailPriceResolver {
    pool: CredentialPool,
    images: Arc<dyn ImageFetcher>,
    model: Arc<dyn VisionModel>,
    rate_limit_backoff: Duration,
    enabled: bool,
}

impl RetailPriceResolver {
    pub fn new(pool: CredentialPool, images: Arc<dyn ImageFetcher>, model: Arc<dyn VisionModel>) -> Self {
        let enabled = !pool.is_empty();
        Self {
            pool,
            images,
            model,
            rate_limit_backoff: Duration::from_secs(RATE_LIMIT_BACKOFF_SECS),
            enabled,
        }
    }

    pub fn with_rate_limit_backoff(mut self, backoff: Duration) -> Self {
        self.rate_limit_backoff = backoff;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Re-enables lookups for a new run if any keys are configured.
    pub fn begin_run(&mut self) {
        self.enabled = !self.pool.is_empty();
    }

    /// Retail quote for one lot, or `None` when lookups are off, the image cannot
    /// be downloaded, or every key failed.
    pub async fn resolve(&mut self, title: &str, image_url: &str, sink: &dyn ProgressSink) -> Option<RetailQuote> {
        if !self.enabled {
            return None;
        }

        let prompt = build_prompt(title);
        for _ in 0..self.pool.len() {
            self.wait_for_slot(sink).await;

            let image = match self.images.fetch(image_url).await {
                Ok(image) => image,
                Err(e) => {
                    warn!("Failed to download image {image_url}: {e}");
                    return None;
                }
            };

            let credential = self.pool.current()?.to_string();
            self.pool.record(Instant::now());
            let err = match self.ask(&credential, &prompt, &image).await {
                Ok(quote) => return Some(quote),
                Err(e) => e,
            };

            if let ModelError::RateLimited(_) = err {
                sink.report_status(
                    &format!("Rate limit hit! Waiting {} seconds before retry...", self.rate_limit_backoff.as_secs()),
                    Severity::Warning,
                );
                tokio::time::sleep(self.rate_limit_backoff).await;
                self.pool.record(Instant::now());
                match self.ask(&credential, &prompt, &image).await {
                    Ok(quote) => return Some(quote),
                    Err(retry_err) => {
                        sink.report_status(&format!("Retry failed: {retry_err}"), Severity::Warning)
                    }
                }
            }

            let next = self.pool.advance();
            sink.report_status(
                &format!("Switching to API key {} due to error: {err}", next + 1),
                Severity::Warning,
            );
        }

        self.enabled = false;
        sink.report_status(
            "All API keys failed. Disabling AI price lookup for this run.",
            Severity::Error,
        );
        None
    }

    async fn ask(&self, credential: &str, prompt: &str, image: &ImageData) -> Result<RetailQuote, ModelError> {
        let reply = self.model.ask(credential, prompt, image).await?;
        debug!(reply = %reply.trim(), "Model reply");
        parse_reply(&reply).ok_or_else(|| ModelError::BadReply(reply.trim().to_string()))
    }

    async fn wait_for_slot(&mut self, sink: &dyn ProgressSink) {
        while let Some(wait) = self.pool.wait_needed(Instant::now()) {
            info!(in_window = self.pool.requests_in_window(), "Rate window full");
            sink.report_status(
                &format!("Rate limit reached. Waiting {} seconds...", wait.as_secs_f64().ceil()),
                Severity::Info,
            );
            tokio::time::sleep(wait).await;
        }
    }
}
