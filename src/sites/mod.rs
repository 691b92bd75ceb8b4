//! Per-site pagination and lot extraction.
//!
//! Each supported auction site is one [`SiteStrategy`]. The orchestrator only talks
//! to the trait, so adding a site means adding a strategy and registering it.

pub mod bidllama;
pub mod hibid;
pub mod nellis;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Selector};
use url::Url;

use crate::error::{AppError, LotError, Result};
use crate::fetcher::{FetchMode, PageFetcher};
use crate::types::{RawLot, Site};

pub use bidllama::BidLlama;
pub use hibid::HiBid;
pub use nellis::Nellis;

#[async_trait]
pub trait SiteStrategy: Send + Sync {
    fn site(&self) -> Site;

    fn fetch_mode(&self) -> FetchMode;

    /// Element that must exist before a rendered listing page counts as loaded.
    fn ready_marker(&self) -> Option<&'static str> {
        None
    }

    /// Builds the page addressing scheme for a catalog.
    fn paginate(&self, catalog_url: &str) -> Result<Paginator>;

    /// Parses one listing page into lots, in page order. Lots missing a required
    /// field are left out rather than reported.
    fn extract_lots(&self, html: &str, page_url: &str) -> Result<Vec<RawLot>>;

    /// Whether this page ends the catalog. Strategies that can tell lot
    /// containers apart from usable lots look at the markup, so a page of
    /// malformed lots does not stop the run.
    fn is_terminal(&self, lots: &[RawLot], _html: &str) -> bool {
        lots.is_empty()
    }

    /// Fills in whatever the listing page could not provide. Most sites have
    /// everything on the listing already.
    async fn complete_lot(
        &self,
        lot: RawLot,
        _fetcher: &dyn PageFetcher,
    ) -> std::result::Result<RawLot, LotError> {
        Ok(lot)
    }
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Paginator {
    /// Page number carried in a query parameter (`?apage=N`, `?page=N`).
    Query { base: Url, param: &'static str },
    /// Page URLs generated up front from the catalog URL. Page 1 is the page
    /// the catalog URL itself shows, so `urls[0]`.
    Precomputed { urls: Vec<String> },
}

impl Paginator {
    pub fn query(catalog_url: &str, param: &'static str) -> Result<Self> {
        let base = Url::parse(catalog_url.trim())
            .map_err(|e| AppError::CatalogUrl(format!("{catalog_url}: {e}")))?;
        Ok(Paginator::Query { base, param })
    }

    /// `None` when the page lies outside a precomputed range.
    pub fn address_for_page(&self, page: u32) -> Option<String> {
        match self {
            Paginator::Query { base, param } => Some(with_query_page(base, param, page)),
            Paginator::Precomputed { urls } => {
                let idx = page.checked_sub(1)? as usize;
                urls.get(idx).cloned()
            }
        }
    }
}

/// Replaces any existing `param` in the query and appends `param=page`.
fn with_query_page(base: &Url, param: &str, page: u32) -> String {
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(k, _)| k != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut url = base.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(param, &page.to_string());
    url.to_string()
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct SiteRegistry {
    strategies: HashMap<Site, Arc<dyn SiteStrategy>>,
}

impl SiteRegistry {
    pub fn empty() -> Self {
        Self { strategies: HashMap::new() }
    }

    /// Replaces any strategy already registered for the same site.
    pub fn register(&mut self, strategy: Arc<dyn SiteStrategy>) {
        self.strategies.insert(strategy.site(), strategy);
    }

    pub fn get(&self, site: Site) -> Option<Arc<dyn SiteStrategy>> {
        self.strategies.get(&site).cloned()
    }

    pub fn sites(&self) -> Vec<Site> {
        let mut sites: Vec<Site> = self.strategies.keys().copied().collect();
        sites.sort_by_key(|s| s.to_string());
        sites
    }
}

impl Default for SiteRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(HiBid));
        registry.register(Arc::new(Nellis));
        registry.register(Arc::new(BidLlama));
        registry
    }
}

// ---------------------------------------------------------------------------
// Markup helpers shared by the strategies
// ---------------------------------------------------------------------------

pub(crate) fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|_| AppError::Selector(css.to_string()))
}

/// Text content with runs of whitespace collapsed.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn non_empty_attr<'a>(el: ElementRef<'a>, name: &str) -> Option<&'a str> {
    el.value().attr(name).map(str::trim).filter(|v| !v.is_empty())
}

/// Resolves `href` against `base`; protocol-relative links become `https:`.
pub(crate) fn absolute_url(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if let Some(rest) = href.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    base.join(href).ok().map(|u| u.to_string())
}
