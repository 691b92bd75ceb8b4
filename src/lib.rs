//! Scrapes sold lots from liquidation auction catalogs, estimates each lot's
//! retail price with an image-understanding model and reports the recovery
//! percentage (sold / retail) as lots resolve.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod progress;
pub mod resolver;
pub mod sites;
pub mod types;

pub use error::{AppError, Result};
pub use orchestrator::{Orchestrator, Pacing, RunPhase, RunReport, StopHandle};
pub use types::{ResolvedLot, ResultRow, Site};
