use std::time::Duration;

use crate::error::{AppError, Result};

pub const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com";
pub const GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const WEBDRIVER_URL: &str = "http://localhost:4444";

/// Desktop browser user agent sent with every page and image request.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Rolling window used to throttle calls to the vision model.
pub const RATE_WINDOW_SECS: u64 = 60;

/// Maximum model calls allowed inside one rolling window, per credential.
pub const RATE_CAPACITY: usize = 10;

/// Wait before the single same-credential retry after a provider 429.
pub const RATE_LIMIT_BACKOFF_SECS: u64 = 30;

/// Upper bound on pre-generated page URLs for fragment-encoded catalogs.
pub const FRAGMENT_PAGE_CAP: usize = 500;

/// Characters of a lot title shown in status messages.
pub const TITLE_PREVIEW_CHARS: usize = 40;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Vision model credentials in rotation order (GEMINI_API_KEYS, comma-separated).
    pub api_keys: Vec<String>,
    pub gemini_model: String,
    pub gemini_api_url: String,
    pub webdriver_url: String,
    pub page_timeout: Duration,
    /// How long a rendered page may take to show its marker element (RENDER_WAIT_SECS)
    pub render_wait: Duration,
    pub image_timeout: Duration,
    /// Courtesy delay after each lot (LOT_DELAY_MS)
    pub lot_delay: Duration,
    /// Courtesy delay after each page (PAGE_DELAY_MS)
    pub page_delay: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_keys: parse_keys(&std::env::var("GEMINI_API_KEYS").unwrap_or_default()),
            gemini_model: std::env::var("GEMINI_MODEL").unwrap_or_else(|_| GEMINI_MODEL.to_string()),
            gemini_api_url: std::env::var("GEMINI_API_URL")
                .unwrap_or_else(|_| GEMINI_API_URL.to_string()),
            webdriver_url: std::env::var("WEBDRIVER_URL")
                .unwrap_or_else(|_| WEBDRIVER_URL.to_string()),
            page_timeout: Duration::from_secs(env_u64("PAGE_TIMEOUT_SECS", 30)?),
            render_wait: Duration::from_secs(env_u64("RENDER_WAIT_SECS", 40)?),
            image_timeout: Duration::from_secs(env_u64("IMAGE_TIMEOUT_SECS", 15)?),
            lot_delay: Duration::from_millis(env_u64("LOT_DELAY_MS", 1000)?),
            page_delay: Duration::from_millis(env_u64("PAGE_DELAY_MS", 1000)?),
        })
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| AppError::Config(format!("{name} must be a non-negative integer"))),
        Err(_) => Ok(default),
    }
}

/// Blank entries are dropped so a trailing comma does not become a dead key.
pub fn parse_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
