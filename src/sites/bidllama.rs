use std::sync::LazyLock;

use async_trait::async_trait;
use base64::engine::general_purpose::{GeneralPurpose, STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use regex::Regex;
use scraper::Html;
use tracing::debug;
use url::Url;

use crate::config::FRAGMENT_PAGE_CAP;
use crate::error::{AppError, LotError, Result};
use crate::fetcher::{FetchMode, PageFetcher};
use crate::sites::{absolute_url, element_text, non_empty_attr, selector, Paginator, SiteStrategy};
use crate::types::{RawLot, Site};

static PAGE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|&)page=(\d+)").expect("valid regex"));

const LISTING_MARKER: &str = "p.item-lot-number";
const DETAIL_MARKER: &str = ".item-winning-bid";

/// BidLlama: a client-rendered catalog whose filter state, page number included,
/// lives in a base64-encoded URL fragment. Sold prices are only shown on each
/// lot's own page.
#[derive(Debug, Default, Clone, Copy)]
pub struct BidLlama;

// ---------------------------------------------------------------------------
// Fragment codec
// ---------------------------------------------------------------------------

/// A catalog URL split at `#`, with the fragment decoded.
struct Fragment<'a> {
    head: &'a str,
    state: String,
    /// Engine the fragment was written with, so rewrites keep its padding.
    engine: &'static GeneralPurpose,
}

fn decode_fragment(url: &str) -> Result<Fragment<'_>> {
    let (head, fragment) = url
        .trim()
        .split_once('#')
        .ok_or_else(|| AppError::CatalogUrl(format!("{url}: no #fragment with catalog state")))?;

    let (bytes, engine) = match STANDARD.decode(fragment) {
        Ok(bytes) => (bytes, &STANDARD),
        Err(_) => STANDARD_NO_PAD
            .decode(fragment)
            .map(|bytes| (bytes, &STANDARD_NO_PAD))
            .map_err(|e| AppError::CatalogUrl(format!("{url}: fragment is not base64 ({e})")))?,
    };
    let state = String::from_utf8(bytes)
        .map_err(|_| AppError::CatalogUrl(format!("{url}: fragment is not UTF-8")))?;
    Ok(Fragment { head, state, engine })
}

fn page_token(url: &str, state: &str) -> Result<u32> {
    PAGE_TOKEN
        .captures(state)
        .and_then(|c| c[2].parse().ok())
        .ok_or_else(|| AppError::CatalogUrl(format!("{url}: fragment has no page=N token")))
}

/// Up to `total_pages` consecutive catalog URLs, starting with the page encoded
/// in `url`. Fewer come back if the page number would overflow.
pub fn fragment_page_urls(url: &str, total_pages: usize) -> Result<Vec<String>> {
    let Fragment { head, state, engine } = decode_fragment(url)?;
    let first = page_token(url, &state)?;

    Ok((0..total_pages)
        .map_while(|offset| first.checked_add(u32::try_from(offset).ok()?))
        .map(|page| {
            let rewritten = PAGE_TOKEN.replace(&state, |caps: &regex::Captures<'_>| {
                format!("{}page={page}", &caps[1])
            });
            format!("{head}#{}", engine.encode(rewritten.as_bytes()))
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

fn parse_detail_price(html: &str) -> Result<Option<String>> {
    let value_sel = selector(".item-winning-bid .value")?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&value_sel)
        .next()
        .map(element_text)
        .filter(|p| !p.is_empty()))
}

#[async_trait]
impl SiteStrategy for BidLlama {
    fn site(&self) -> Site {
        Site::BidLlama
    }

    fn fetch_mode(&self) -> FetchMode {
        FetchMode::Rendered
    }

    fn ready_marker(&self) -> Option<&'static str> {
        Some(LISTING_MARKER)
    }

    fn paginate(&self, catalog_url: &str) -> Result<Paginator> {
        let urls = fragment_page_urls(catalog_url, FRAGMENT_PAGE_CAP)?;
        Ok(Paginator::Precomputed { urls })
    }

    fn extract_lots(&self, html: &str, page_url: &str) -> Result<Vec<RawLot>> {
        let page = Url::parse(page_url).map_err(|e| AppError::CatalogUrl(format!("{page_url}: {e}")))?;
        let card_sel = selector("div.lot-card")?;
        let title_sel = selector("a.item-title")?;
        let img_sel = selector("img.item-image")?;

        let document = Html::parse_document(html);
        let cards: Vec<_> = document.select(&card_sel).collect();
        let total = cards.len();

        let mut lots = Vec::with_capacity(total);
        for (i, card) in cards.into_iter().enumerate() {
            let Some(anchor) = card.select(&title_sel).next() else { continue };
            let title = element_text(anchor);
            let detail_url = non_empty_attr(anchor, "href").and_then(|h| absolute_url(&page, h));
            let image_url = card
                .select(&img_sel)
                .next()
                .and_then(|img| non_empty_attr(img, "src").or_else(|| non_empty_attr(img, "data-src")))
                .and_then(|src| absolute_url(&page, src));

            let (Some(detail_url), Some(image_url)) = (detail_url, image_url) else { continue };
            if title.is_empty() {
                continue;
            }

            lots.push(RawLot {
                title,
                detail_url,
                image_url,
                sold_price_text: String::new(),
                position_on_page: i + 1,
                total_on_page: total,
            });
        }

        Ok(lots)
    }

    /// Ends the catalog only when no cards render at all; cards with a missing
    /// field are skipped without stopping.
    fn is_terminal(&self, lots: &[RawLot], html: &str) -> bool {
        match selector("div.lot-card") {
            Ok(card_sel) => Html::parse_document(html).select(&card_sel).next().is_none(),
            Err(_) => lots.is_empty(),
        }
    }

    async fn complete_lot(
        &self,
        mut lot: RawLot,
        fetcher: &dyn PageFetcher,
    ) -> std::result::Result<RawLot, LotError> {
        debug!(url = %lot.detail_url, "Fetching lot detail for sold price");
        let html = fetcher
            .fetch(&lot.detail_url, Some(DETAIL_MARKER))
            .await
            .map_err(LotError::DetailUnavailable)?;

        match parse_detail_price(&html) {
            Ok(Some(price)) => {
                lot.sold_price_text = price;
                Ok(lot)
            }
            _ => Err(LotError::MissingPrice),
        }
    }
}
