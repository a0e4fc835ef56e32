use crate::fetch::{FetchEngine, FetchStatus};
use crate::metrics::CrawlMetrics;
use crate::parser::{Extractor, PageContext};
use crate::queue::CrawlQueue;
use crate::storage::RecordSink;
use crate::types::{VenueRecord, WorkState};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Final classification of one coordinator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Exhausted,
    Failed,
    Cancelled,
    /// The item could not be claimed; nothing ran.
    Refused,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Exhausted => "exhausted",
            RunOutcome::Failed => "failed",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::Refused => "refused",
        }
    }
}

/// Summary of one run, returned to whoever triggered it.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub location_path: String,
    pub record_count: usize,
    pub pages_fetched: usize,
    pub terminal_state: RunOutcome,
    /// Queue state of the item after the run, when known.
    pub item_state: Option<WorkState>,
    pub success: bool,
    pub error: Option<String>,
    pub run_id: String,
    pub duration_ms: u64,
    pub discarded: usize,
}

impl RunReport {
    /// Report for a request rejected before any queue interaction.
    pub fn rejected(location_path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            location_path: location_path.into(),
            record_count: 0,
            pages_fetched: 0,
            terminal_state: RunOutcome::Failed,
            item_state: None,
            success: false,
            error: Some(error.into()),
            run_id: Uuid::new_v4().to_string(),
            duration_ms: 0,
            discarded: 0,
        }
    }
}

/// Records of a run in discovery order; the first occurrence of an id wins.
#[derive(Debug, Default)]
pub struct RunAggregate {
    seen: HashSet<String>,
    records: Vec<VenueRecord>,
    duplicates: usize,
}

impl RunAggregate {
    pub fn add(&mut self, records: Vec<VenueRecord>) {
        for record in records {
            if self.seen.insert(record.source_id.clone()) {
                self.records.push(record);
            } else {
                self.duplicates += 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn into_records(self) -> Vec<VenueRecord> {
        self.records
    }
}

/// Drives one work item through claim, fetch, extraction, persistence and
/// the final queue transition.
pub struct Coordinator {
    queue: CrawlQueue,
    fetcher: FetchEngine,
    extractor: Extractor,
    sink: Arc<dyn RecordSink>,
}

struct Finish {
    outcome: RunOutcome,
    error: Option<String>,
    record_count: usize,
    pages_fetched: usize,
    discarded: usize,
}

impl Coordinator {
    pub fn new(queue: CrawlQueue, fetcher: FetchEngine, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            queue,
            fetcher,
            extractor: Extractor::new(),
            sink,
        }
    }

    pub fn queue(&self) -> &CrawlQueue {
        &self.queue
    }

    /// Site the fetcher crawls; listing URLs are resolved against it.
    pub fn base_url(&self) -> &str {
        self.fetcher.base_url()
    }

    /// Request the item (`ready|error → pending`) and run it. Every failure
    /// is reported in the returned `RunReport`; cancelling `cancel` ends the
    /// run with the item in `error`.
    #[instrument(skip(self, cancel))]
    pub async fn trigger(&self, location_path: &str, cancel: &CancellationToken) -> RunReport {
        match self.queue.request(location_path).await {
            Ok(true) => {}
            Ok(false) => info!(path = location_path, "item not requestable, attempting claim as-is"),
            Err(e) => {
                error!(path = location_path, error = %e, "request failed");
                return self.report(location_path, &Uuid::new_v4().to_string(), Instant::now(), Finish::failed(e.to_string()), None);
            }
        }
        self.run(location_path, cancel).await
    }

    /// Claim the item and run it; a refused claim runs nothing.
    #[instrument(skip(self, cancel))]
    pub async fn run(&self, location_path: &str, cancel: &CancellationToken) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        match self.queue.claim(location_path).await {
            Ok(true) => self.execute(location_path, &run_id, started, cancel).await,
            Ok(false) => {
                let item_state = self.current_state(location_path).await;
                let reason = match item_state {
                    Some(state) => format!("item is {state}, not pending"),
                    None => format!("unknown location: {location_path}"),
                };
                info!(path = location_path, %reason, "claim refused");
                let finish = Finish { outcome: RunOutcome::Refused, ..Finish::failed(reason) };
                let report = self.report(location_path, &run_id, started, finish, item_state);
                CrawlMetrics::record_run(report.terminal_state.as_str(), started.elapsed());
                report
            }
            Err(e) => {
                error!(path = location_path, error = %e, "claim failed");
                self.report(location_path, &run_id, started, Finish::failed(e.to_string()), None)
            }
        }
    }

    /// Run an item the caller has already claimed (`running`).
    pub async fn run_claimed(&self, location_path: &str, cancel: &CancellationToken) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        self.execute(location_path, &run_id, Instant::now(), cancel).await
    }

    async fn execute(&self, path: &str, run_id: &str, started: Instant, cancel: &CancellationToken) -> RunReport {
        info!(path, run_id, "🚀 starting crawl run");
        let finish = self.crawl_with_heartbeat(path, run_id, cancel).await;
        let item_state = self.record_terminal_state(path, &finish).await;
        let report = self.report(path, run_id, started, finish, item_state);
        CrawlMetrics::record_run(report.terminal_state.as_str(), started.elapsed());

        if report.success {
            info!(
                path,
                run_id,
                records = report.record_count,
                pages = report.pages_fetched,
                outcome = report.terminal_state.as_str(),
                "✅ crawl run finished"
            );
        } else {
            warn!(
                path,
                run_id,
                records = report.record_count,
                outcome = report.terminal_state.as_str(),
                error = report.error.as_deref().unwrap_or(""),
                "❌ crawl run did not complete"
            );
        }
        report
    }

    /// Crawl while refreshing the item's lease, so no other process
    /// releases it as abandoned.
    async fn crawl_with_heartbeat(&self, path: &str, run_id: &str, cancel: &CancellationToken) -> Finish {
        let crawl = self.crawl(path, run_id, cancel);
        tokio::pin!(crawl);
        let mut heartbeat = tokio::time::interval(self.queue.heartbeat_interval());
        heartbeat.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                finish = &mut crawl => return finish,
                _ = heartbeat.tick() => match self.queue.heartbeat(path).await {
                    Ok(true) => {}
                    Ok(false) => warn!(path, run_id, "item no longer running; lease not refreshed"),
                    Err(e) => warn!(path, run_id, error = %e, "heartbeat failed"),
                },
            }
        }
    }

    async fn crawl(&self, path: &str, run_id: &str, cancel: &CancellationToken) -> Finish {
        let fetched = self.fetcher.fetch_all(path, cancel).await;
        let pages_fetched = fetched.pages.len();

        let mut aggregate = RunAggregate::default();
        let mut discarded = 0;
        let mut failed_pages = 0;
        for page in &fetched.pages {
            let ctx = PageContext::new(path, page.page_number);
            match self.extractor.extract(&page.html, &ctx) {
                Ok(extraction) => {
                    CrawlMetrics::record_extraction(extraction.records.len(), extraction.discarded);
                    discarded += extraction.discarded;
                    aggregate.add(extraction.records);
                }
                Err(e) => {
                    CrawlMetrics::record_page_failure();
                    warn!(path, page = page.page_number, error = %e, "dropping page");
                    failed_pages += 1;
                    discarded += page.entry_count;
                }
            }
        }
        if aggregate.duplicates() > 0 {
            info!(path, duplicates = aggregate.duplicates(), "dropped records repeated across pages");
        }

        let record_count = aggregate.len();
        if !aggregate.is_empty() {
            if let Err(e) = self.sink.persist(run_id, &aggregate.into_records()).await {
                error!(path, run_id, error = %e, "failed to persist records");
                return Finish {
                    outcome: RunOutcome::Failed,
                    error: Some(format!("persisting records failed: {e}")),
                    record_count: 0,
                    pages_fetched,
                    discarded,
                };
            }
        }

        let (outcome, error) = match fetched.status {
            FetchStatus::Failed => (RunOutcome::Failed, fetched.error),
            FetchStatus::Cancelled => (
                RunOutcome::Cancelled,
                Some(format!("cancelled: {}", fetched.error.unwrap_or_default())),
            ),
            _ if pages_fetched > 0 && failed_pages == pages_fetched => (
                RunOutcome::Failed,
                Some(format!("all {failed_pages} page(s) with entries produced no valid records")),
            ),
            FetchStatus::Completed => (RunOutcome::Completed, None),
            FetchStatus::Exhausted => (RunOutcome::Exhausted, None),
        };

        Finish { outcome, error, record_count, pages_fetched, discarded }
    }

    async fn record_terminal_state(&self, path: &str, finish: &Finish) -> Option<WorkState> {
        let transition = match finish.outcome {
            RunOutcome::Completed | RunOutcome::Exhausted => self.queue.complete(path, finish.record_count as u32).await,
            _ => {
                let message = finish.error.as_deref().unwrap_or("run failed");
                self.queue.fail(path, message).await
            }
        };
        match transition {
            Ok(true) => {}
            Ok(false) => warn!(path, "item left running state during the run; terminal transition refused"),
            Err(e) => error!(path, error = %e, "failed to record terminal state"),
        }
        self.current_state(path).await
    }

    async fn current_state(&self, path: &str) -> Option<WorkState> {
        match self.queue.get(path).await {
            Ok(item) => item.map(|i| i.state),
            Err(e) => {
                warn!(path, error = %e, "could not read item state");
                None
            }
        }
    }

    fn report(&self, path: &str, run_id: &str, started: Instant, finish: Finish, item_state: Option<WorkState>) -> RunReport {
        let success = matches!(finish.outcome, RunOutcome::Completed | RunOutcome::Exhausted)
            && finish.error.is_none();
        RunReport {
            location_path: path.to_string(),
            record_count: finish.record_count,
            pages_fetched: finish.pages_fetched,
            terminal_state: finish.outcome,
            item_state,
            success,
            error: finish.error,
            run_id: run_id.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            discarded: finish.discarded,
        }
    }
}

impl Finish {
    fn failed(error: String) -> Self {
        Self {
            outcome: RunOutcome::Failed,
            error: Some(error),
            record_count: 0,
            pages_fetched: 0,
            discarded: 0,
        }
    }
}
