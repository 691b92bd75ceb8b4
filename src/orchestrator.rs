use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::config::{Config, TITLE_PREVIEW_CHARS};
use crate::error::{AppError, FetchError, LotError, Result};
use crate::fetcher::{FetcherConnector, PageFetcher};
use crate::progress::{ProgressSink, Severity};
use crate::resolver::RetailPriceResolver;
use crate::sites::{Paginator, SiteRegistry, SiteStrategy};
use crate::types::{parse_price, preview, RawLot, ResolvedLot, Site};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::Running => "running",
            RunPhase::Completed => "completed",
            RunPhase::Cancelled => "cancelled",
            RunPhase::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Cooperative stop flag shared between one run and whoever may cancel it.
/// Once stopped it stays stopped; the orchestrator hands out a fresh handle
/// for the next run.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stop_requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        !self.stop_requested.load(Ordering::SeqCst)
    }
}

/// Everything one run owns. Lives only for the duration of [`Orchestrator::run`].
#[derive(Debug)]
pub struct RunState {
    pub site: Site,
    pub phase: RunPhase,
    pub running: StopHandle,
    pub start_page: u32,
    pub current_page: u32,
    pub pages_scraped: u32,
    pub results: Vec<ResolvedLot>,
    pub recovery_samples: Vec<Decimal>,
    seen: HashSet<String>,
}

impl RunState {
    fn new(site: Site, start_page: u32, running: StopHandle) -> Self {
        Self {
            site,
            phase: RunPhase::Idle,
            running,
            start_page,
            current_page: start_page,
            pages_scraped: 0,
            results: Vec::new(),
            recovery_samples: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn average_recovery(&self) -> Decimal {
        if self.recovery_samples.is_empty() {
            return Decimal::ZERO;
        }
        let total = self
            .recovery_samples
            .iter()
            .try_fold(Decimal::ZERO, |acc, s| acc.checked_add(*s))
            .unwrap_or(Decimal::MAX);
        total / Decimal::from(self.recovery_samples.len())
    }

    fn accept(&mut self, lot: ResolvedLot) -> std::result::Result<(), LotError> {
        if !self.seen.insert(lot.detail_url.clone()) {
            return Err(LotError::Duplicate(lot.detail_url));
        }
        self.recovery_samples.push(lot.recovery_percent);
        self.results.push(lot);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub phase: RunPhase,
    pub pages_scraped: u32,
    /// Resolved lots in discovery order.
    pub lots: Vec<ResolvedLot>,
}

/// Courtesy delays toward the auction site, independent of model throttling.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub between_lots: Duration,
    pub between_pages: Duration,
}

impl Pacing {
    pub fn none() -> Self {
        Self { between_lots: Duration::ZERO, between_pages: Duration::ZERO }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self { between_lots: cfg.lot_delay, between_pages: cfg.page_delay }
    }
}

/// Drives one scrape at a time: pages in order, lots in page order, results
/// reported as they resolve.
pub struct Orchestrator {
    registry: SiteRegistry,
    connector: Arc<dyn FetcherConnector>,
    resolver: RetailPriceResolver,
    sink: Arc<dyn ProgressSink>,
    pacing: Pacing,
    stop: StopHandle,
}

impl Orchestrator {
    pub fn new(
        registry: SiteRegistry,
        connector: Arc<dyn FetcherConnector>,
        resolver: RetailPriceResolver,
        sink: Arc<dyn ProgressSink>,
        pacing: Pacing,
    ) -> Self {
        Self {
            registry,
            connector,
            resolver,
            sink,
            pacing,
            stop: StopHandle::default(),
        }
    }

    /// Handle that cancels the next or current run from another task. A stop
    /// requested before `run` is called still takes effect.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Scrapes `site` from `start_page` through `end_page` (`0` = until the
    /// catalog runs out). Never fails: problems become status messages and the
    /// lots resolved so far are always returned.
    pub async fn run(&mut self, site: Site, catalog_url: &str, start_page: u32, end_page: u32) -> RunReport {
        let start_page = start_page.max(1);
        let mut state = RunState::new(site, start_page, self.stop.clone());
        state.phase = RunPhase::Running;
        self.resolver.begin_run();

        info!(%site, url = catalog_url, start_page, end_page, "Run started");
        self.sink.report_status(&format!("Starting {site} scrape at page {start_page}"), Severity::Info);
        if !self.resolver.is_enabled() {
            self.sink.report_status(
                "No API keys configured; AI price lookup is disabled and lots cannot be priced.",
                Severity::Warning,
            );
        }

        state.phase = match self.prepare_and_scrape(&mut state, catalog_url, end_page).await {
            Ok(phase) => phase,
            Err(e) => {
                error!(%site, "Run failed: {e}");
                self.sink.report_status(
                    &format!("An unexpected error occurred during scraping: {e}"),
                    Severity::Error,
                );
                RunPhase::Failed
            }
        };
        state.running.stop();
        self.stop = StopHandle::default();

        info!(
            %site,
            phase = %state.phase,
            pages = state.pages_scraped,
            lots = state.results.len(),
            "Run finished"
        );

        RunReport {
            phase: state.phase,
            pages_scraped: state.pages_scraped,
            lots: state.results,
        }
    }

    async fn prepare_and_scrape(&mut self, state: &mut RunState, catalog_url: &str, end_page: u32) -> Result<RunPhase> {
        let strategy = self
            .registry
            .get(state.site)
            .ok_or_else(|| AppError::UnknownSite(state.site.to_string()))?;
        let pager = strategy.paginate(catalog_url)?;
        let fetcher = self.connector.open(strategy.fetch_mode()).await?;

        let outcome = self
            .scrape_pages(state, strategy.as_ref(), &pager, fetcher.as_ref(), end_page)
            .await;

        if let Err(e) = fetcher.close().await {
            warn!("Fetcher close failed: {e}");
        }
        outcome
    }

    async fn scrape_pages(
        &mut self,
        state: &mut RunState,
        strategy: &dyn SiteStrategy,
        pager: &Paginator,
        fetcher: &dyn PageFetcher,
        end_page: u32,
    ) -> Result<RunPhase> {
        loop {
            if !state.running.is_running() {
                self.sink.report_status("Scraping stopped.", Severity::Warning);
                return Ok(RunPhase::Cancelled);
            }
            let page = state.current_page;
            if end_page != 0 && page > end_page {
                self.sink.report_status(
                    &format!("Reached end page {end_page}. Scraping complete."),
                    Severity::Success,
                );
                return Ok(RunPhase::Completed);
            }

            let Some(page_url) = pager.address_for_page(page) else {
                if page == state.start_page {
                    return Err(AppError::CatalogUrl(format!(
                        "start page {page} is outside the pages this catalog URL can address"
                    )));
                }
                self.sink.report_status(
                    &format!("Page {page} is beyond the pages this catalog URL can address. Stopping."),
                    Severity::Warning,
                );
                return Ok(RunPhase::Completed);
            };

            self.sink.report_status(&format!("Scraping {} page {page}...", state.site), Severity::Info);
            let html = match fetcher.fetch(&page_url, strategy.ready_marker()).await {
                Ok(html) => html,
                Err(FetchError::NoMoreContent { .. }) => {
                    self.sink.report_status("No more items found. Scraping complete.", Severity::Success);
                    return Ok(RunPhase::Completed);
                }
                Err(e) => return Err(e.into()),
            };

            let lots = strategy.extract_lots(&html, &page_url)?;
            if strategy.is_terminal(&lots, &html) {
                self.sink.report_status("No more items with prices. Scraping complete.", Severity::Success);
                return Ok(RunPhase::Completed);
            }

            state.pages_scraped += 1;
            debug!(page, lots = lots.len(), "Page extracted");
            self.sink
                .report_metrics(state.pages_scraped, state.results.len(), state.average_recovery());

            for lot in lots {
                if !state.running.is_running() {
                    self.sink.report_status("Scraping stopped.", Severity::Warning);
                    return Ok(RunPhase::Cancelled);
                }
                self.process_lot(state, strategy, fetcher, lot).await;
                tokio::time::sleep(self.pacing.between_lots).await;
            }

            state.current_page += 1;
            tokio::time::sleep(self.pacing.between_pages).await;
        }
    }

    async fn process_lot(&mut self, state: &mut RunState, strategy: &dyn SiteStrategy, fetcher: &dyn PageFetcher, lot: RawLot) {
        let position = lot.position_on_page;
        let total = lot.total_on_page;
        let title = preview(&lot.title, TITLE_PREVIEW_CHARS).to_string();
        self.sink.report_status(&format!("Processing item {position}/{total}: {title}..."), Severity::Info);

        let outcome = if state.seen.contains(&lot.detail_url) {
            Err(LotError::Duplicate(lot.detail_url))
        } else {
            self.resolve_lot(strategy, fetcher, lot).await.and_then(|resolved| state.accept(resolved))
        };
        match outcome {
            Ok(()) => self.sink.report_result_table(&state.results),
            Err(e) => self.sink.report_status(&format!("Skipping '{title}': {e}"), Severity::Warning),
        }

        self.sink
            .report_metrics(state.pages_scraped, state.results.len(), state.average_recovery());
        let fraction = if total == 0 { 1.0 } else { position as f64 / total as f64 };
        self.sink.report_progress(fraction, &format!("Page Progress: {position}/{total}"));
    }

    async fn resolve_lot(
        &mut self,
        strategy: &dyn SiteStrategy,
        fetcher: &dyn PageFetcher,
        lot: RawLot,
    ) -> std::result::Result<ResolvedLot, LotError> {
        let lot = strategy.complete_lot(lot, fetcher).await?;
        if lot.sold_price_text.trim().is_empty() {
            return Err(LotError::MissingPrice);
        }
        let sold = parse_price(&lot.sold_price_text)
            .ok_or_else(|| LotError::PriceParse(lot.sold_price_text.clone()))?;

        let quote = self
            .resolver
            .resolve(&lot.title, &lot.image_url, self.sink.as_ref())
            .await
            .ok_or(LotError::NoRetailPrice)?;
        ResolvedLot::new(&lot, sold, quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::fetcher::FetchMode;
    use crate::progress::{ChannelSink, ProgressEvent};
    use crate::resolver::{CredentialPool, ImageData, ImageFetcher, VisionModel};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::Mutex;

    const CATALOG: &str = "https://hibid.com/catalog/4411/estate-tools";

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn page_url(page: u32) -> String {
        format!("{CATALOG}?apage={page}")
    }

    /// A HiBid tile whose image id doubles as the key the fake model prices by.
    fn tile(id: &str, sold: &str) -> String {
        format!(
            r#"<app-lot-tile>
                 <a href="/lot/{id}"><img class="lot-thumbnail img-fluid" src="https://img.test/{id}.jpg"></a>
                 <h2 class="lot-title">Lot {id}</h2>
                 <strong class="lot-price-realized">{sold}</strong>
               </app-lot-tile>"#
        )
    }

    fn listing(tiles: &[String]) -> String {
        format!("<html><body>{}</body></html>", tiles.concat())
    }

    /// Serves fixed markup by URL. An unknown URL is a 503 for static sites
    /// and a marker timeout for rendered ones.
    struct FakeSite {
        mode: FetchMode,
        pages: HashMap<String, String>,
        fetched: Mutex<Vec<String>>,
        closed: Mutex<u32>,
    }

    impl FakeSite {
        fn new(pages: Vec<(u32, String)>) -> Arc<Self> {
            Self::with_mode(
                FetchMode::Static,
                pages.into_iter().map(|(n, html)| (page_url(n), html)).collect(),
            )
        }

        fn rendered(pages: Vec<(String, String)>) -> Arc<Self> {
            Self::with_mode(FetchMode::Rendered, pages.into_iter().collect())
        }

        fn with_mode(mode: FetchMode, pages: HashMap<String, String>) -> Arc<Self> {
            Arc::new(Self {
                mode,
                pages,
                fetched: Mutex::default(),
                closed: Mutex::default(),
            })
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    struct FakeFetcher(Arc<FakeSite>);

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, url: &str, _ready: Option<&str>) -> std::result::Result<String, FetchError> {
            self.0.fetched.lock().unwrap().push(url.to_string());
            match (self.0.pages.get(url), self.0.mode) {
                (Some(html), _) => Ok(html.clone()),
                (None, FetchMode::Static) => Err(FetchError::unreachable(url, "HTTP 503")),
                (None, FetchMode::Rendered) => Err(FetchError::NoMoreContent { url: url.to_string() }),
            }
        }

        async fn close(&self) -> Result<()> {
            *self.0.closed.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[async_trait]
    impl FetcherConnector for Arc<FakeSite> {
        async fn open(&self, mode: FetchMode) -> Result<Box<dyn PageFetcher>> {
            assert_eq!(mode, self.mode);
            Ok(Box::new(FakeFetcher(self.clone())))
        }
    }

    struct FakeImages;

    #[async_trait]
    impl ImageFetcher for FakeImages {
        async fn fetch(&self, url: &str) -> std::result::Result<ImageData, FetchError> {
            if url.contains("broken") {
                return Err(FetchError::unreachable(url, "HTTP 404"));
            }
            Ok(ImageData { bytes: url.as_bytes().to_vec(), mime_type: "image/jpeg".to_string() })
        }
    }

    /// Prices every image at a fixed retail price.
    struct FixedPrice(&'static str);

    #[async_trait]
    impl VisionModel for FixedPrice {
        async fn ask(&self, _key: &str, _prompt: &str, _image: &ImageData) -> std::result::Result<String, ModelError> {
            Ok(format!("{}, https://shop.test/item", self.0))
        }
    }

    fn orchestrator(site: Arc<FakeSite>, retail: &'static str) -> (Orchestrator, tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sink, rx) = ChannelSink::channel();
        let resolver = RetailPriceResolver::new(
            CredentialPool::new(vec!["key-1".to_string()]),
            Arc::new(FakeImages),
            Arc::new(FixedPrice(retail)),
        );
        let orch = Orchestrator::new(SiteRegistry::default(), Arc::new(site), resolver, Arc::new(sink), Pacing::none());
        (orch, rx)
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn tables(events: &[ProgressEvent]) -> Vec<Vec<ResolvedLot>> {
        events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::ResultTable(rows) => Some(rows.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn failed_image_drops_only_that_lot() {
        let site = FakeSite::new(vec![
            (1, listing(&[tile("1", "$25.00"), tile("broken", "$10.00")])),
            (2, listing(&[tile("3", "$5.00")])),
            (3, listing(&[])),
        ]);
        let (mut orch, mut rx) = orchestrator(site.clone(), "50.00");

        let report = orch.run(Site::HiBid, CATALOG, 1, 0).await;

        assert_eq!(report.phase, RunPhase::Completed);
        assert_eq!(report.pages_scraped, 2);
        let urls: Vec<_> = report.lots.iter().map(|l| l.detail_url.as_str()).collect();
        assert_eq!(urls, vec!["https://hibid.com/lot/1", "https://hibid.com/lot/3"]);

        let first = &report.lots[0];
        assert_eq!(first.sold_price, dec("25.00"));
        assert_eq!(first.retail_price, dec("50.00"));
        assert_eq!(first.recovery_percent, dec("50.0"));
        assert_eq!(crate::types::ResultRow::from(first).recovery, "50.0%");

        let events = drain(&mut rx);
        let skipped = events.iter().any(|e| {
            matches!(e, ProgressEvent::Status { message, severity: Severity::Warning }
                if message.contains("Lot broken"))
        });
        assert!(skipped, "the failed lot is reported as a warning");
        assert_eq!(*site.closed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn unbounded_run_stops_at_first_empty_page() {
        let site = FakeSite::new(vec![
            (1, listing(&[tile("1", "$10.00"), tile("2", "$20.00")])),
            (2, listing(&[tile("3", "$30.00")])),
            (3, listing(&[])),
            (4, listing(&[tile("4", "$40.00")])),
        ]);
        let (mut orch, mut rx) = orchestrator(site.clone(), "40.00");

        let report = orch.run(Site::HiBid, CATALOG, 1, 0).await;

        assert_eq!(report.phase, RunPhase::Completed);
        assert_eq!(report.lots.len(), 3);
        assert_eq!(site.fetched(), vec![page_url(1), page_url(2), page_url(3)]);

        // Every table snapshot extends the previous one without reordering.
        let snapshots = tables(&drain(&mut rx));
        assert_eq!(snapshots.len(), 3);
        for pair in snapshots.windows(2) {
            assert_eq!(pair[1].len(), pair[0].len() + 1);
            assert_eq!(&pair[1][..pair[0].len()], &pair[0][..]);
        }

        for lot in &report.lots {
            assert!(lot.retail_price > Decimal::ZERO);
            assert_eq!(
                Some(lot.recovery_percent),
                crate::types::recovery_percent(lot.sold_price, lot.retail_price)
            );
        }
    }

    #[tokio::test]
    async fn end_page_bounds_the_run() {
        let site = FakeSite::new(vec![
            (2, listing(&[tile("2", "$10.00")])),
            (3, listing(&[tile("3", "$10.00")])),
            (4, listing(&[tile("4", "$10.00")])),
        ]);
        let (mut orch, _rx) = orchestrator(site.clone(), "20.00");

        let report = orch.run(Site::HiBid, CATALOG, 2, 3).await;

        assert_eq!(report.phase, RunPhase::Completed);
        assert_eq!(report.lots.len(), 2);
        assert_eq!(site.fetched(), vec![page_url(2), page_url(3)]);
    }

    #[tokio::test]
    async fn unreachable_page_fails_but_keeps_results() {
        let site = FakeSite::new(vec![(1, listing(&[tile("1", "$10.00")]))]);
        let (mut orch, mut rx) = orchestrator(site.clone(), "20.00");

        let report = orch.run(Site::HiBid, CATALOG, 1, 0).await;

        assert_eq!(report.phase, RunPhase::Failed);
        assert_eq!(report.lots.len(), 1);
        let errors = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, ProgressEvent::Status { severity: Severity::Error, .. }))
            .count();
        assert_eq!(errors, 1);
        assert_eq!(*site.closed.lock().unwrap(), 1, "fetcher released on failure");
    }

    #[tokio::test]
    async fn duplicate_detail_urls_are_collected_once() {
        let site = FakeSite::new(vec![
            (1, listing(&[tile("1", "$10.00"), tile("1", "$12.00")])),
            (2, listing(&[])),
        ]);
        let (mut orch, _rx) = orchestrator(site, "20.00");

        let report = orch.run(Site::HiBid, CATALOG, 1, 0).await;
        assert_eq!(report.lots.len(), 1);
        assert_eq!(report.lots[0].sold_price, dec("10.00"));
    }

    #[tokio::test]
    async fn unparseable_sold_price_is_skipped() {
        let site = FakeSite::new(vec![
            (1, listing(&[tile("1", "Pending"), tile("2", "$8.00")])),
            (2, listing(&[])),
        ]);
        let (mut orch, _rx) = orchestrator(site, "16.00");

        let report = orch.run(Site::HiBid, CATALOG, 1, 0).await;
        assert_eq!(report.lots.len(), 1);
        assert_eq!(report.lots[0].recovery_percent, dec("50.0"));
    }

    #[tokio::test]
    async fn bad_catalog_url_fails_without_fetching() {
        let site = FakeSite::new(vec![]);
        let (mut orch, _rx) = orchestrator(site.clone(), "20.00");

        let report = orch.run(Site::HiBid, "hibid catalog", 1, 0).await;
        assert_eq!(report.phase, RunPhase::Failed);
        assert!(report.lots.is_empty());
        assert!(site.fetched().is_empty());
    }

    #[tokio::test]
    async fn missing_credentials_drop_every_lot() {
        let site = FakeSite::new(vec![(1, listing(&[tile("1", "$10.00")])), (2, listing(&[]))]);
        let (sink, _rx) = ChannelSink::channel();
        let resolver = RetailPriceResolver::new(
            CredentialPool::new(vec![]),
            Arc::new(FakeImages),
            Arc::new(FixedPrice("20.00")),
        );
        let mut orch =
            Orchestrator::new(SiteRegistry::default(), Arc::new(site), resolver, Arc::new(sink), Pacing::none());

        let report = orch.run(Site::HiBid, CATALOG, 1, 0).await;
        assert_eq!(report.phase, RunPhase::Completed);
        assert!(report.lots.is_empty());
    }

    /// Requests a stop as soon as the first result is reported.
    struct StopOnFirstResult {
        handle: Mutex<Option<StopHandle>>,
        tables: Mutex<usize>,
    }

    impl ProgressSink for StopOnFirstResult {
        fn report_status(&self, _message: &str, _severity: Severity) {}
        fn report_progress(&self, _fraction: f64, _label: &str) {}
        fn report_metrics(&self, _pages: u32, _lots: usize, _avg: Decimal) {}
        fn report_result_table(&self, _lots: &[ResolvedLot]) {
            *self.tables.lock().unwrap() += 1;
            if let Some(handle) = self.handle.lock().unwrap().as_ref() {
                handle.stop();
            }
        }
    }

    #[tokio::test]
    async fn stop_takes_effect_at_next_lot() {
        let site = FakeSite::new(vec![
            (1, listing(&[tile("1", "$10.00"), tile("2", "$10.00"), tile("3", "$10.00")])),
            (2, listing(&[tile("4", "$10.00")])),
        ]);
        let sink = Arc::new(StopOnFirstResult { handle: Mutex::default(), tables: Mutex::default() });
        let resolver = RetailPriceResolver::new(
            CredentialPool::new(vec!["key-1".to_string()]),
            Arc::new(FakeImages),
            Arc::new(FixedPrice("20.00")),
        );
        let mut orch = Orchestrator::new(
            SiteRegistry::default(),
            Arc::new(site.clone()),
            resolver,
            sink.clone(),
            Pacing::none(),
        );
        let handle = orch.stop_handle();
        *sink.handle.lock().unwrap() = Some(handle.clone());

        let report = orch.run(Site::HiBid, CATALOG, 1, 0).await;

        assert_eq!(report.phase, RunPhase::Cancelled);
        assert_eq!(report.lots.len(), 1);
        assert_eq!(*sink.tables.lock().unwrap(), 1);
        assert_eq!(site.fetched(), vec![page_url(1)]);
        assert!(!handle.is_running());
        assert!(orch.stop_handle().is_running(), "next run gets a fresh handle");
    }

    #[tokio::test]
    async fn stop_before_run_is_not_lost() {
        let site = FakeSite::new(vec![(1, listing(&[tile("1", "$10.00")])), (2, listing(&[]))]);
        let (mut orch, _rx) = orchestrator(site.clone(), "20.00");

        orch.stop_handle().stop();
        let cancelled = orch.run(Site::HiBid, CATALOG, 1, 0).await;
        assert_eq!(cancelled.phase, RunPhase::Cancelled);
        assert!(cancelled.lots.is_empty());
        assert!(site.fetched().is_empty());

        let next = orch.run(Site::HiBid, CATALOG, 1, 0).await;
        assert_eq!(next.phase, RunPhase::Completed);
        assert_eq!(next.lots.len(), 1);
    }

    #[tokio::test]
    async fn page_of_malformed_priced_tiles_does_not_end_run() {
        let no_image = r#"<app-lot-tile>
                 <a href="/lot/9"><img src="https://img.test/9.jpg"></a>
                 <h2 class="lot-title">Lot 9</h2>
                 <strong class="lot-price-realized">$9.00</strong>
               </app-lot-tile>"#
            .to_string();
        let site = FakeSite::new(vec![
            (1, listing(&[no_image])),
            (2, listing(&[tile("2", "$10.00")])),
            (3, listing(&[])),
        ]);
        let (mut orch, _rx) = orchestrator(site.clone(), "20.00");

        let report = orch.run(Site::HiBid, CATALOG, 1, 0).await;

        assert_eq!(report.phase, RunPhase::Completed);
        assert_eq!(report.lots.len(), 1);
        assert_eq!(report.lots[0].detail_url, "https://hibid.com/lot/2");
        assert_eq!(site.fetched(), vec![page_url(1), page_url(2), page_url(3)]);
    }

    // -----------------------------------------------------------------------
    // Rendered site with fragment pagination and detail-page prices
    // -----------------------------------------------------------------------

    fn bidllama_catalog(state: &str) -> String {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        format!("https://bid.bidllama.com/lots#{}", STANDARD.encode(state))
    }

    fn lot_card(id: u32) -> String {
        format!(
            r#"<div class="lot-card">
                 <p class="item-lot-number">Lot {id}</p>
                 <img class="item-image" src="https://cdn.bidllama.com/{id}.jpg">
                 <a class="item-title" href="/lots/{id}">Lot {id}</a>
               </div>"#
        )
    }

    fn winning_bid(amount: &str) -> String {
        format!(r#"<div class="item-winning-bid">Winning bid <span class="value">{amount}</span></div>"#)
    }

    #[tokio::test]
    async fn rendered_catalog_ends_when_listing_never_renders() {
        let catalog = bidllama_catalog("limit=30&page=3");
        let pages = crate::sites::bidllama::fragment_page_urls(&catalog, 2).unwrap();
        let site = FakeSite::rendered(vec![
            (pages[0].clone(), listing(&[lot_card(5501)])),
            ("https://bid.bidllama.com/lots/5501".to_string(), winning_bid("$25.00")),
        ]);
        let (mut orch, _rx) = orchestrator(site.clone(), "50.00");

        let report = orch.run(Site::BidLlama, &catalog, 1, 0).await;

        assert_eq!(report.phase, RunPhase::Completed);
        assert_eq!(report.pages_scraped, 1);
        assert_eq!(report.lots.len(), 1);
        assert_eq!(report.lots[0].detail_url, "https://bid.bidllama.com/lots/5501");
        assert_eq!(report.lots[0].sold_price, dec("25.00"));
        assert_eq!(report.lots[0].recovery_percent, dec("50.0"));
        assert_eq!(
            site.fetched(),
            vec![pages[0].clone(), "https://bid.bidllama.com/lots/5501".to_string(), pages[1].clone()]
        );
        assert_eq!(*site.closed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn start_page_counts_from_the_catalog_url_page() {
        let catalog = bidllama_catalog("limit=30&page=3");
        let pages = crate::sites::bidllama::fragment_page_urls(&catalog, 2).unwrap();
        let site = FakeSite::rendered(vec![
            (pages[1].clone(), listing(&[lot_card(7)])),
            ("https://bid.bidllama.com/lots/7".to_string(), winning_bid("$5.00")),
        ]);
        let (mut orch, _rx) = orchestrator(site.clone(), "10.00");

        let report = orch.run(Site::BidLlama, &catalog, 2, 2).await;

        assert_eq!(report.phase, RunPhase::Completed);
        assert_eq!(report.lots.len(), 1);
        assert_eq!(site.fetched()[0], pages[1]);
    }

    #[tokio::test]
    async fn start_page_past_the_precomputed_range_fails() {
        let catalog = bidllama_catalog("limit=30&page=3");
        let site = FakeSite::rendered(vec![]);
        let (mut orch, mut rx) = orchestrator(site.clone(), "10.00");

        let beyond = crate::config::FRAGMENT_PAGE_CAP as u32 + 1;
        let report = orch.run(Site::BidLlama, &catalog, beyond, 0).await;

        assert_eq!(report.phase, RunPhase::Failed);
        assert!(site.fetched().is_empty());
        assert_eq!(*site.closed.lock().unwrap(), 1);
        let errors = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, ProgressEvent::Status { severity: Severity::Error, .. }))
            .count();
        assert_eq!(errors, 1);
    }

    #[test]
    fn average_recovery_is_mean_of_samples() {
        let mut state = RunState::new(Site::HiBid, 1, StopHandle::default());
        assert_eq!(state.average_recovery(), Decimal::ZERO);
        state.recovery_samples = vec![dec("50.0"), dec("25.0"), dec("30.0")];
        assert_eq!(state.average_recovery(), dec("35"));
    }
}
