use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::LotError;

// ---------------------------------------------------------------------------
// Site
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    HiBid,
    Nellis,
    BidLlama,
}

impl Site {
    pub const ALL: [Site; 3] = [Site::HiBid, Site::Nellis, Site::BidLlama];
}

impl std::fmt::Display for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Site::HiBid => "HiBid",
            Site::Nellis => "Nellis",
            Site::BidLlama => "BidLlama",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Site {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hibid" => Ok(Site::HiBid),
            "nellis" => Ok(Site::Nellis),
            "bidllama" => Ok(Site::BidLlama),
            other => Err(format!("unknown site `{other}` (expected hibid, nellis or bidllama)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Lots
// ---------------------------------------------------------------------------

/// One lot as scraped from a listing page, before any pricing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLot {
    pub title: String,
    pub detail_url: String,
    pub image_url: String,
    /// Empty until filled from the detail page on sites that hide it from listings.
    pub sold_price_text: String,
    /// 1-based.
    pub position_on_page: usize,
    pub total_on_page: usize,
}

/// Estimated retail price for a lot plus the link the model based it on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetailQuote {
    pub price: Decimal,
    pub source_link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLot {
    pub title: String,
    pub detail_url: String,
    pub sold_price: Decimal,
    pub retail_price: Decimal,
    pub recovery_percent: Decimal,
    pub retail_source: String,
}

impl ResolvedLot {
    /// Fails unless the retail price is strictly positive and the recovery
    /// percentage fits in a `Decimal`.
    pub fn new(raw: &RawLot, sold_price: Decimal, quote: RetailQuote) -> Result<Self, LotError> {
        if quote.price <= Decimal::ZERO {
            return Err(LotError::NonPositiveRetail(quote.price));
        }
        let recovery = recovery_percent(sold_price, quote.price).ok_or(LotError::RecoveryOutOfRange {
            sold: sold_price,
            retail: quote.price,
        })?;
        Ok(Self {
            title: raw.title.clone(),
            detail_url: raw.detail_url.clone(),
            sold_price,
            retail_price: quote.price,
            recovery_percent: recovery,
            retail_source: quote.source_link,
        })
    }
}

/// `round(sold / retail * 100, 1)`, half away from zero. `None` on a zero
/// retail price or overflow.
pub fn recovery_percent(sold: Decimal, retail: Decimal) -> Option<Decimal> {
    let ratio = sold.checked_div(retail)?.checked_mul(Decimal::ONE_HUNDRED)?;
    Some(ratio.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero))
}

// ---------------------------------------------------------------------------
// Price text
// ---------------------------------------------------------------------------

/// Normalises sold-price text such as `"$1,234.50 USD"` to a 2dp decimal.
/// Returns `None` for anything that is not a non-negative number once currency
/// markers and separators are stripped.
pub fn parse_price(text: &str) -> Option<Decimal> {
    let cleaned: String = text
        .replace("USD", "")
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let value = Decimal::from_str(&cleaned).ok()?;
    if value.is_sign_negative() && !value.is_zero() {
        return None;
    }
    Some(value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

// ---------------------------------------------------------------------------
// Export rows
// ---------------------------------------------------------------------------

/// One exported row, formatted the way the result table is presented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRow {
    #[serde(rename = "Link")]
    pub link: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Sold Price")]
    pub sold_price: String,
    #[serde(rename = "Retail Price")]
    pub retail_price: String,
    #[serde(rename = "Recovery")]
    pub recovery: String,
}

impl From<&ResolvedLot> for ResultRow {
    fn from(lot: &ResolvedLot) -> Self {
        Self {
            link: lot.detail_url.clone(),
            title: lot.title.clone(),
            sold_price: format_usd(lot.sold_price),
            retail_price: format_usd(lot.retail_price),
            recovery: format!("{:.1}%", lot.recovery_percent),
        }
    }
}

/// `$#,##0.00`
pub fn format_usd(amount: Decimal) -> String {
    let fixed = format!(
        "{:.2}",
        amount.abs().round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    );
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount.is_sign_negative() && !amount.is_zero() { "-" } else { "" };
    format!("{sign}${grouped}.{frac_part}")
}

/// Truncates to at most `max` characters without splitting a code point.
pub fn preview(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
