//! Progress reporting seam between the scraping core and whatever presents it.
//!
//! The core never touches a UI element directly; it emits status lines, per-page
//! progress, run metrics and snapshots of the result table through [`ProgressSink`].

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::types::{format_usd, ResolvedLot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{s}")
    }
}

pub trait ProgressSink: Send + Sync {
    fn report_status(&self, message: &str, severity: Severity);

    /// `fraction` is the share of the current page's lots already handled.
    fn report_progress(&self, fraction: f64, label: &str);

    fn report_metrics(&self, pages_scraped: u32, lots_scraped: usize, average_recovery: Decimal);

    /// Called with the full ordered result sequence after every resolved lot.
    fn report_result_table(&self, lots: &[ResolvedLot]);
}

// ---------------------------------------------------------------------------
// TracingSink
// ---------------------------------------------------------------------------

/// Writes every event to the log. Used by the headless binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn report_status(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info | Severity::Success => info!(%severity, "{message}"),
            Severity::Warning => warn!("{message}"),
            Severity::Error => error!("{message}"),
        }
    }

    fn report_progress(&self, fraction: f64, label: &str) {
        info!(progress = %format!("{:.0}%", fraction * 100.0), "{label}");
    }

    fn report_metrics(&self, pages_scraped: u32, lots_scraped: usize, average_recovery: Decimal) {
        info!(
            pages = pages_scraped,
            lots = lots_scraped,
            "[METRICS] pages={pages_scraped} lots={lots_scraped} avg_recovery={average_recovery:.1}%"
        );
    }

    fn report_result_table(&self, lots: &[ResolvedLot]) {
        if let Some(last) = lots.last() {
            info!(
                rows = lots.len(),
                "[RESULT] {} | sold {} retail {} recovery {:.1}%",
                last.title,
                format_usd(last.sold_price),
                format_usd(last.retail_price),
                last.recovery_percent,
            );
        }
    }
}

// ---------------------------------------------------------------------------
// ChannelSink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Status { message: String, severity: Severity },
    Progress { fraction: f64, label: String },
    Metrics { pages_scraped: u32, lots_scraped: usize, average_recovery: Decimal },
    ResultTable(Vec<ResolvedLot>),
}

/// Forwards events to a receiver owned by a front-end running on another task.
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl ProgressSink for ChannelSink {
    fn report_status(&self, message: &str, severity: Severity) {
        self.send(ProgressEvent::Status { message: message.to_string(), severity });
    }

    fn report_progress(&self, fraction: f64, label: &str) {
        self.send(ProgressEvent::Progress { fraction, label: label.to_string() });
    }

    fn report_metrics(&self, pages_scraped: u32, lots_scraped: usize, average_recovery: Decimal) {
        self.send(ProgressEvent::Metrics { pages_scraped, lots_scraped, average_recovery });
    }

    fn report_result_table(&self, lots: &[ResolvedLot]) {
        self.send(ProgressEvent::ResultTable(lots.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_forwards_events_in_order() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.report_status("Scraping page 1", Severity::Info);
        sink.report_progress(0.5, "Page Progress: 1/2");
        sink.report_metrics(1, 0, Decimal::ZERO);

        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::Status { message: "Scraping page 1".to_string(), severity: Severity::Info }
        );
        assert!(matches!(rx.try_recv().unwrap(), ProgressEvent::Progress { fraction, .. } if fraction == 0.5));
        assert!(matches!(rx.try_recv().unwrap(), ProgressEvent::Metrics { pages_scraped: 1, .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.report_status("nobody listening", Severity::Warning);
    }
}
