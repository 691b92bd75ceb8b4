use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};
use url::Url;

use crate::error::{AppError, Result};
use crate::fetcher::FetchMode;
use crate::sites::{absolute_url, element_text, non_empty_attr, selector, Paginator, SiteStrategy};
use crate::types::{RawLot, Site};

// CSS-module class names carry a build hash suffix (`ProductCard_card__x7Yq2`).
static CARD_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\s)ProductCard_card__\w+").expect("valid regex"));
static TITLE_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\s)ProductCard_title__\w+").expect("valid regex"));
static PRICE_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\s)ProductCard_price__\w+").expect("valid regex"));

/// Nellis auction listings. Cards are located by class-name pattern because
/// the class names change with every front-end deploy.
#[derive(Debug, Default, Clone, Copy)]
pub struct Nellis;

fn has_class(el: &ElementRef<'_>, pattern: &Regex) -> bool {
    el.value().attr("class").is_some_and(|c| pattern.is_match(c))
}

fn has_card(html: &str) -> Result<bool> {
    let classed = selector("[class]")?;
    let document = Html::parse_document(html);
    let found = document.select(&classed).any(|el| has_class(&el, &CARD_CLASS));
    Ok(found)
}

fn find_by_class<'a>(root: ElementRef<'a>, pattern: &Regex) -> Option<ElementRef<'a>> {
    root.descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| has_class(el, pattern))
}

impl SiteStrategy for Nellis {
    fn site(&self) -> Site {
        Site::Nellis
    }

    fn fetch_mode(&self) -> FetchMode {
        FetchMode::Static
    }

    fn paginate(&self, catalog_url: &str) -> Result<Paginator> {
        Paginator::query(catalog_url, "page")
    }

    fn extract_lots(&self, html: &str, page_url: &str) -> Result<Vec<RawLot>> {
        let page = Url::parse(page_url).map_err(|e| AppError::CatalogUrl(format!("{page_url}: {e}")))?;
        let classed = selector("[class]")?;
        let link_sel = selector("a[href]")?;
        let img_sel = selector("img")?;

        let document = Html::parse_document(html);
        let cards: Vec<_> = document
            .select(&classed)
            .filter(|el| has_class(el, &CARD_CLASS))
            .collect();
        let total = cards.len();

        let mut lots = Vec::with_capacity(total);
        for (i, card) in cards.into_iter().enumerate() {
            let title = find_by_class(card, &TITLE_CLASS).map(element_text).filter(|t| !t.is_empty());
            let price = find_by_class(card, &PRICE_CLASS).map(element_text).filter(|p| !p.is_empty());
            let detail_url = card
                .select(&link_sel)
                .next()
                .and_then(|a| non_empty_attr(a, "href"))
                .and_then(|href| absolute_url(&page, href));
            let image_url = card
                .select(&img_sel)
                .next()
                .and_then(|img| non_empty_attr(img, "src").or_else(|| non_empty_attr(img, "data-src")))
                .and_then(|src| absolute_url(&page, src));

            let (Some(title), Some(detail_url), Some(image_url), Some(price)) =
                (title, detail_url, image_url, price)
            else {
                continue;
            };

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

    fn is_terminal(&self, lots: &[RawLot], html: &str) -> bool {
        match has_card(html) {
            Ok(found) => !found,
            Err(_) => lots.is_empty(),
        }
    }
}
