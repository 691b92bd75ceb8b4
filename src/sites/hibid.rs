use scraper::Html;
use url::Url;

use crate::error::{AppError, Result};
use crate::fetcher::FetchMode;
use crate::sites::{absolute_url, element_text, non_empty_attr, selector, Paginator, SiteStrategy};
use crate::types::{RawLot, Site};

/// HiBid catalogs: server-rendered `app-lot-tile` elements, paged with `apage`.
/// Only tiles that show a realized price count as lots.
#[derive(Debug, Default, Clone, Copy)]
pub struct HiBid;

const TILE: &str = "app-lot-tile";
const PRICE: &str = "strong.lot-price-realized";

impl HiBid {
    /// Lot links are relative to the site root that precedes `/catalog`.
    fn link_base(page_url: &str) -> Option<&str> {
        page_url.split_once("/catalog").map(|(root, _)| root)
    }

    fn has_priced_tile(html: &str) -> Result<bool> {
        let tile_sel = selector(TILE)?;
        let price_sel = selector(PRICE)?;
        let document = Html::parse_document(html);
        let found = document
            .select(&tile_sel)
            .any(|tile| tile.select(&price_sel).next().is_some());
        Ok(found)
    }
}

impl SiteStrategy for HiBid {
    fn site(&self) -> Site {
        Site::HiBid
    }

    fn fetch_mode(&self) -> FetchMode {
        FetchMode::Static
    }

    fn paginate(&self, catalog_url: &str) -> Result<Paginator> {
        Paginator::query(catalog_url, "apage")
    }

    fn extract_lots(&self, html: &str, page_url: &str) -> Result<Vec<RawLot>> {
        let page = Url::parse(page_url).map_err(|e| AppError::CatalogUrl(format!("{page_url}: {e}")))?;
        let tile_sel = selector(TILE)?;
        let price_sel = selector(PRICE)?;
        let title_sel = selector("h2.lot-title")?;
        let link_sel = selector("a[href]")?;
        let img_sel = selector("img.lot-thumbnail.img-fluid")?;

        let document = Html::parse_document(html);
        let priced: Vec<_> = document
            .select(&tile_sel)
            .filter(|tile| tile.select(&price_sel).next().is_some())
            .collect();
        let total = priced.len();

        let mut lots = Vec::with_capacity(total);
        for (i, tile) in priced.into_iter().enumerate() {
            let title = tile.select(&title_sel).next().map(element_text).filter(|t| !t.is_empty());
            let href = tile.select(&link_sel).next().and_then(|a| non_empty_attr(a, "href"));
            let image = tile.select(&img_sel).next().and_then(|img| non_empty_attr(img, "src"));
            let price = tile.select(&price_sel).next().map(element_text).filter(|p| !p.is_empty());

            let (Some(title), Some(href), Some(image), Some(price)) = (title, href, image, price) else {
                continue;
            };

            let detail_url = match Self::link_base(page_url) {
                Some(root) if href.starts_with('/') => format!("{root}{href}"),
                _ => match absolute_url(&page, href) {
                    Some(u) => u,
                    None => continue,
                },
            };
            let Some(image_url) = absolute_url(&page, image) else { continue };

            lots.push(RawLot {
                title,
                detail_url,
                image_url,
                sold_price_text: price,
                position_on_page: i + 1,
                total_on_page: total,
            });
        }

        Ok(lots)
    }

    /// The catalog ends at the first page with no priced tile, however many of
    /// the priced tiles were usable.
    fn is_terminal(&self, lots: &[RawLot], html: &str) -> bool {
        match Self::has_priced_tile(html) {
            Ok(found) => !found,
            Err(_) => lots.is_empty(),
        }
    }
}
