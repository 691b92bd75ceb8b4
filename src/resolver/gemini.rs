use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use crate::config::{Config, USER_AGENT};
use crate::error::{FetchError, ModelError, Result};
use crate::resolver::{ImageData, ImageFetcher, VisionModel};

/// Used when the image host does not say what it served.
const FALLBACK_MIME: &str = "image/png";

/// Google Gemini `generateContent` over REST.
pub struct GeminiClient {
    client: reqwest::Client,
    api_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_url: String, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(cfg.gemini_api_url.clone(), cfg.gemini_model.clone())
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.api_url, self.model)
    }
}

/// Maps a non-success response onto the failure classes the resolver acts on.
fn classify_failure(status: StatusCode, body: &str) -> ModelError {
    let summary = format!("HTTP {status}: {}", body.chars().take(300).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        ModelError::RateLimited(summary)
    } else if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || body.contains("API_KEY_INVALID")
    {
        ModelError::Auth(summary)
    } else {
        ModelError::Transport(summary)
    }
}

/// Concatenates the text parts of the first candidate.
fn reply_text(body: &serde_json::Value) -> Option<String> {
    let parts = body
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl VisionModel for GeminiClient {
    async fn ask(&self, credential: &str, prompt: &str, image: &ImageData) -> std::result::Result<String, ModelError> {
        let request = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": prompt },
                    { "inlineData": { "mimeType": image.mime_type, "data": STANDARD.encode(&image.bytes) } }
                ]
            }]
        });

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", credential)
            .json(&request)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }

        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| ModelError::BadReply(e.to_string()))?;
        reply_text(&value).ok_or_else(|| ModelError::BadReply("response had no text".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Image download
// ---------------------------------------------------------------------------

pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<ImageData, FetchError> {
        debug!(url, "Downloading lot image");
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

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or_else(|| FALLBACK_MIME.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::unreachable(url, e))?;

        Ok(ImageData { bytes: bytes.to_vec(), mime_type })
    }
}
