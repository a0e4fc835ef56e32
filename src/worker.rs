//! Worker pool: long-running tasks that drain the crawl queue.
//!
//! Each worker owns one HTTP client for its whole lifetime and loops
//! `claim_next` → run. When nothing is pending it optionally requeues failed
//! items under the retry cap, then sleeps (or exits in drain mode).
//!
//! At startup the pool releases `running` items whose lease expired. Runs
//! heartbeat their item, so claims held by live processes are left alone.

use crate::app::ports::{HttpClientPort, RateLimiterPort};
use crate::config::CrawlerConfig;
use crate::disguise::DisguisePolicy;
use crate::error::Result;
use crate::fetch::FetchEngine;
use crate::pipeline::{Coordinator, RunOutcome};
use crate::queue::CrawlQueue;
use crate::storage::RecordSink;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Builds the HTTP client a worker keeps for its lifetime.
pub type HttpClientFactory = Arc<dyn Fn() -> Result<Arc<dyn HttpClientPort>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub count: usize,
    pub poll_interval: Duration,
    pub auto_requeue: bool,
    /// Exit once nothing is pending instead of polling forever.
    pub drain: bool,
}

/// Run counts, per worker and summed for the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub runs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub refused: usize,
}

impl WorkerStats {
    fn merge(&mut self, other: WorkerStats) {
        self.runs += other.runs;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.refused += other.refused;
    }
}

pub struct WorkerPool {
    settings: WorkerSettings,
    crawler: CrawlerConfig,
    queue: CrawlQueue,
    sink: Arc<dyn RecordSink>,
    limiter: Arc<dyn RateLimiterPort>,
    disguise: Arc<dyn DisguisePolicy>,
    http_factory: HttpClientFactory,
}

impl WorkerPool {
    pub fn new(
        settings: WorkerSettings,
        crawler: CrawlerConfig,
        queue: CrawlQueue,
        sink: Arc<dyn RecordSink>,
        limiter: Arc<dyn RateLimiterPort>,
        disguise: Arc<dyn DisguisePolicy>,
        http_factory: HttpClientFactory,
    ) -> Self {
        Self {
            settings,
            crawler,
            queue,
            sink,
            limiter,
            disguise,
            http_factory,
        }
    }

    /// Run until `shutdown` fires (or, in drain mode, until the queue is empty).
    pub async fn run(self, shutdown: CancellationToken) -> Result<WorkerStats> {
        self.queue.release_stale_running().await?;
        info!(
            workers = self.settings.count,
            drain = self.settings.drain,
            auto_requeue = self.settings.auto_requeue,
            "👷 worker pool starting"
        );

        let mut handles = Vec::with_capacity(self.settings.count);
        for worker_id in 0..self.settings.count.max(1) {
            let http = match (self.http_factory)() {
                Ok(http) => http,
                Err(e) => {
                    error!(worker_id, error = %e, "could not build HTTP client, worker not started");
                    continue;
                }
            };
            let fetcher = FetchEngine::new(http, self.limiter.clone(), self.disguise.clone(), &self.crawler);
            let worker = Worker {
                id: worker_id,
                coordinator: Coordinator::new(self.queue.clone(), fetcher, self.sink.clone()),
                settings: self.settings.clone(),
            };
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move { worker.run(shutdown).await }));
        }

        let mut total = WorkerStats::default();
        for handle in handles {
            match handle.await {
                Ok(stats) => total.merge(stats),
                Err(e) => error!(error = %e, "worker task panicked"),
            }
        }
        info!(
            runs = total.runs,
            succeeded = total.succeeded,
            failed = total.failed,
            "worker pool stopped"
        );
        Ok(total)
    }
}

struct Worker {
    id: usize,
    coordinator: Coordinator,
    settings: WorkerSettings,
}

impl Worker {
    async fn run(self, shutdown: CancellationToken) -> WorkerStats {
        let mut stats = WorkerStats::default();
        let queue = self.coordinator.queue().clone();
        info!(worker_id = self.id, "worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match queue.claim_next().await {
                Ok(Some(item)) => {
                    let report = self.coordinator.run_claimed(item.path(), &shutdown).await;
                    stats.runs += 1;
                    match report.terminal_state {
                        RunOutcome::Refused => stats.refused += 1,
                        _ if report.success => stats.succeeded += 1,
                        _ => stats.failed += 1,
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(worker_id = self.id, error = %e, "claim_next failed");
                    if !self.pause(&shutdown, Duration::from_secs(1)).await {
                        break;
                    }
                    continue;
                }
            }

            if self.settings.auto_requeue {
                match queue.requeue_failed().await {
                    Ok(paths) if !paths.is_empty() => continue,
                    Ok(_) => {}
                    Err(e) => warn!(worker_id = self.id, error = %e, "automatic requeue failed"),
                }
            }

            if self.settings.drain {
                debug!(worker_id = self.id, "queue drained");
                break;
            }
            if !self.pause(&shutdown, self.settings.poll_interval).await {
                break;
            }
        }

        info!(worker_id = self.id, runs = stats.runs, "worker stopped");
        stats
    }

    /// Sleep unless shutdown fires first; `false` means shut down.
    async fn pause(&self, shutdown: &CancellationToken, duration: Duration) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
