use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lot_recovery::config::Config;
use lot_recovery::fetcher::WebConnector;
use lot_recovery::progress::TracingSink;
use lot_recovery::resolver::{CredentialPool, GeminiClient, HttpImageFetcher, RetailPriceResolver};
use lot_recovery::sites::SiteRegistry;
use lot_recovery::{Orchestrator, Pacing, Result, ResultRow, RunPhase, RunReport, Site};

#[derive(Debug, Parser)]
#[command(name = "lot-recovery", about = "Recovery rates for sold auction lots")]
struct Args {
    /// Auction site: hibid, nellis or bidllama
    #[arg(long)]
    site: Site,

    /// Catalog URL as copied from the browser
    #[arg(long)]
    url: String,

    /// First page to scrape. For BidLlama, page 1 is the page the URL shows
    #[arg(long, default_value_t = 1)]
    start_page: u32,

    /// Last page to scrape; 0 keeps going until the catalog runs out
    #[arg(long, default_value_t = 0)]
    end_page: u32,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .with_writer(std::io::stderr)
        .init();

    match run(cfg, args).await {
        Ok(report) if report.phase == RunPhase::Failed => std::process::exit(2),
        Ok(_) => {}
        Err(e) => {
            error!("Fatal error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(cfg: Config, args: Args) -> Result<RunReport> {
    if cfg.api_keys.is_empty() {
        warn!("GEMINI_API_KEYS is empty; no lot can be priced");
    } else {
        info!("Loaded {} API key(s)", cfg.api_keys.len());
    }

    let resolver = RetailPriceResolver::new(
        CredentialPool::new(cfg.api_keys.clone()),
        Arc::new(HttpImageFetcher::new(cfg.image_timeout)?),
        Arc::new(GeminiClient::from_config(&cfg)?),
    );
    let mut orchestrator = Orchestrator::new(
        SiteRegistry::default(),
        Arc::new(WebConnector::from_config(&cfg)),
        resolver,
        Arc::new(TracingSink),
        Pacing::from_config(&cfg),
    );

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current lot");
            stop.stop();
        }
    });

    let report = orchestrator
        .run(args.site, &args.url, args.start_page, args.end_page)
        .await;

    let rows: Vec<ResultRow> = report.lots.iter().map(ResultRow::from).collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);

    info!(
        phase = %report.phase,
        pages = report.pages_scraped,
        lots = report.lots.len(),
        "Done"
    );
    Ok(report)
}
