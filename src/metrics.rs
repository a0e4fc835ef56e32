//! Prometheus metrics for the crawler.
//!
//! The recorder is installed once per process; `render` serves the text
//! exposition from the in-process handle, so no separate listener is needed.

use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

static HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder. Idempotent.
pub fn init_metrics() {
    if HANDLE.get().is_some() {
        return;
    }
    match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if HANDLE.set(handle).is_ok() {
                CrawlMetrics::describe();
                info!("Prometheus recorder installed");
            }
        }
        Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
    }
}

/// Current metrics in Prometheus text format; empty if no recorder is installed.
pub fn render() -> String {
    HANDLE.get().map(|h| h.render()).unwrap_or_default()
}

/// Counters and histograms for fetching, extraction and whole runs.
pub struct CrawlMetrics;

impl CrawlMetrics {
    fn describe() {
        ::metrics::describe_counter!("veg_pages_fetched_total", "Listing pages fetched successfully");
        ::metrics::describe_counter!("veg_page_failures_total", "Listing page fetches that failed");
        ::metrics::describe_counter!("veg_records_extracted_total", "Valid venue records extracted");
        ::metrics::describe_counter!("veg_records_discarded_total", "Venue entries discarded during extraction");
        ::metrics::describe_counter!("veg_runs_total", "Pipeline runs by outcome");
        ::metrics::describe_histogram!("veg_run_duration_seconds", "Wall-clock duration of pipeline runs");
    }

    pub fn record_page_fetched() {
        ::metrics::counter!("veg_pages_fetched_total").increment(1);
    }

    pub fn record_page_failure() {
        ::metrics::counter!("veg_page_failures_total").increment(1);
    }

    pub fn record_extraction(kept: usize, discarded: usize) {
        ::metrics::counter!("veg_records_extracted_total").increment(kept as u64);
        ::metrics::counter!("veg_records_discarded_total").increment(discarded as u64);
    }

    pub fn record_run(outcome: &'static str, duration: Duration) {
        ::metrics::counter!("veg_runs_total", "outcome" => outcome).increment(1);
        ::metrics::histogram!("veg_run_duration_seconds").record(duration.as_secs_f64());
    }
}
