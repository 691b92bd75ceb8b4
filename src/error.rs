use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Page fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Invalid selector `{0}`")]
    Selector(String),

    #[error("Invalid catalog URL: {0}")]
    CatalogUrl(String),

    #[error("No strategy registered for site {0}")]
    UnknownSite(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Outcome of a page fetch that did not yield markup.
///
/// `NoMoreContent` is the end-of-catalog convention used by rendered pages whose
/// marker element never showed up; orchestration treats it as completion.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url} unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("no more content at {url}")]
    NoMoreContent { url: String },
}

impl FetchError {
    pub fn unreachable(url: &str, reason: impl ToString) -> Self {
        FetchError::Unreachable {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Failure of a single call to the external vision model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Provider quota rejection (HTTP 429 / RESOURCE_EXHAUSTED).
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("credential rejected: {0}")]
    Auth(String),

    #[error("unusable reply: {0}")]
    BadReply(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Reasons a lot is dropped. None of these abort the run.
#[derive(Debug, Error)]
pub enum LotError {
    #[error("no sold price found")]
    MissingPrice,

    #[error("unparseable sold price `{0}`")]
    PriceParse(String),

    #[error("detail page unavailable: {0}")]
    DetailUnavailable(FetchError),

    #[error("AI could not find a retail price")]
    NoRetailPrice,

    #[error("retail price {0} is not positive")]
    NonPositiveRetail(rust_decimal::Decimal),

    #[error("recovery for sold {sold} against retail {retail} is out of range")]
    RecoveryOutOfRange {
        sold: rust_decimal::Decimal,
        retail: rust_decimal::Decimal,
    },

    #[error("already collected {0}")]
    Duplicate(String),
}
