//! Crawl queue: durable work items and the guarded state machine over them.
//!
//! ```text
//! ready ──request──▶ pending ──claim──▶ running ──complete──▶ completed
//!   ▲                  ▲                   │
//!   │                  └──requeue (retry<max)── error ◀──fail──┘
//!   └──────── reset (any) ─────────    skip (any) ──▶ skip
//! ```

pub mod sqlite;
pub mod store;

use crate::error::{Result, ScraperError};
use crate::types::{Location, WorkItem, WorkState};
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub use sqlite::SqliteQueueStore;
pub use store::{QueueStats, QueueStore, Transition, UpsertSummary};

/// Reason recorded on `running` items whose lease expired.
pub const INTERRUPTED_REASON: &str = "interrupted";

/// How long a `running` item may go without a heartbeat before another
/// process may treat its holder as dead.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(15 * 60);

/// Administrative status overwrites accepted from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Pending,
    Skip,
    Reset,
}

impl FromStr for AdminAction {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(AdminAction::Pending),
            "skip" => Ok(AdminAction::Skip),
            "reset" | "ready" => Ok(AdminAction::Reset),
            other => Err(ScraperError::InvalidState(format!(
                "unknown action '{other}' (expected pending, skip or reset)"
            ))),
        }
    }
}

/// Owns every mutation of work items. Refused transitions are `Ok(false)`,
/// never errors.
#[derive(Clone)]
pub struct CrawlQueue {
    store: Arc<dyn QueueStore>,
    max_retries: u32,
    stale_after: Duration,
}

impl CrawlQueue {
    pub fn new(store: Arc<dyn QueueStore>, max_retries: u32) -> Self {
        Self {
            store,
            max_retries,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Lease length for `running` items.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// How often a run refreshes its lease: three heartbeats per lease.
    pub fn heartbeat_interval(&self) -> Duration {
        (self.stale_after / 3).max(Duration::from_millis(1))
    }

    pub async fn upsert_locations(&self, locations: &[Location]) -> Result<UpsertSummary> {
        let summary = self.store.upsert_locations(locations).await?;
        info!(inserted = summary.inserted, updated = summary.updated, "loaded locations into queue");
        Ok(summary)
    }

    /// `ready|error → pending`; retry count unchanged.
    pub async fn request(&self, path: &str) -> Result<bool> {
        self.transition(path, Transition::Request).await
    }

    /// `pending → running`.
    pub async fn claim(&self, path: &str) -> Result<bool> {
        self.transition(path, Transition::Claim).await
    }

    pub async fn claim_next(&self) -> Result<Option<WorkItem>> {
        let item = self.store.claim_next().await?;
        if let Some(item) = &item {
            info!(path = %item.path(), priority = item.location.priority.as_str(), "claimed work item");
        }
        Ok(item)
    }

    /// `running → completed`; clears the retry count and last error.
    pub async fn complete(&self, path: &str, result_count: u32) -> Result<bool> {
        self.transition(path, Transition::Complete { result_count }).await
    }

    /// `running → error`; bumps the retry count.
    pub async fn fail(&self, path: &str, message: &str) -> Result<bool> {
        self.transition(path, Transition::Fail { message: message.to_string() }).await
    }

    /// `error → pending`, only while the retry count is under the cap.
    pub async fn requeue(&self, path: &str) -> Result<bool> {
        self.transition(path, Transition::Requeue { max_retries: self.max_retries }).await
    }

    /// Requeue every failed item still under the retry cap.
    #[instrument(skip(self), fields(max_retries = self.max_retries))]
    pub async fn requeue_failed(&self) -> Result<Vec<String>> {
        let paths = self.store.requeue_failed(self.max_retries).await?;
        if !paths.is_empty() {
            info!(count = paths.len(), "requeued failed items");
        }
        Ok(paths)
    }

    pub async fn skip(&self, path: &str) -> Result<bool> {
        self.transition(path, Transition::Skip).await
    }

    /// Back to `ready` with a clean retry count.
    pub async fn reset(&self, path: &str) -> Result<bool> {
        self.transition(path, Transition::Reset).await
    }

    /// Apply an administrative overwrite; errors if the path is unknown.
    pub async fn set_status(&self, path: &str, action: AdminAction) -> Result<bool> {
        if self.store.get(path).await?.is_none() {
            return Err(ScraperError::UnknownLocation(path.to_string()));
        }
        match action {
            AdminAction::Pending => self.request(path).await,
            AdminAction::Skip => self.skip(path).await,
            AdminAction::Reset => self.reset(path).await,
        }
    }

    /// Refresh the lease of an item this process is running.
    pub async fn heartbeat(&self, path: &str) -> Result<bool> {
        self.store.heartbeat(path).await
    }

    /// Move `running` items whose lease expired to `error`. Items another
    /// process is still heartbeating are left alone.
    pub async fn release_stale_running(&self) -> Result<u64> {
        let released = self.store.release_running(INTERRUPTED_REASON, self.stale_cutoff()?).await?;
        if released > 0 {
            warn!(
                count = released,
                stale_after_secs = self.stale_after.as_secs(),
                "released work items whose lease expired"
            );
        }
        Ok(released)
    }

    fn stale_cutoff(&self) -> Result<DateTime<Utc>> {
        let lease = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| ScraperError::Config(format!("stale lease out of range: {e}")))?;
        Ok(Utc::now().checked_sub_signed(lease).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    pub async fn get(&self, path: &str) -> Result<Option<WorkItem>> {
        self.store.get(path).await
    }

    pub async fn list(&self, state: Option<WorkState>) -> Result<Vec<WorkItem>> {
        self.store.list(state).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.store.stats().await
    }

    async fn transition(&self, path: &str, transition: Transition) -> Result<bool> {
        let applied = self.store.apply(path, &transition).await?;
        if applied {
            info!(path, transition = transition.name(), to = %transition.target(), "work item transition");
        } else {
            info!(path, transition = transition.name(), "transition refused");
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn location(path: &str, entries: u32) -> Location {
        let name = path.rsplit('/').next().unwrap_or(path);
        Location::new(name, "Texas", path, format!("https://example.org/{path}"), entries).unwrap()
    }

    fn queue(max_retries: u32) -> (TempDir, CrawlQueue) {
        let dir = TempDir::new().unwrap();
        let store = SqliteQueueStore::open(dir.path().join("queue.db")).unwrap();
        (dir, CrawlQueue::new(Arc::new(store), max_retries))
    }

    async fn state(q: &CrawlQueue, path: &str) -> WorkState {
        q.get(path).await.unwrap().unwrap().state
    }

    #[tokio::test]
    async fn new_items_start_ready_and_follow_the_happy_path() {
        let (_dir, q) = queue(3);
        q.upsert_locations(&[location("na/usa/tx/dallas", 250)]).await.unwrap();
        let p = "na/usa/tx/dallas";
        assert_eq!(state(&q, p).await, WorkState::Ready);

        assert!(!q.claim(p).await.unwrap(), "ready items cannot be claimed");
        assert!(q.request(p).await.unwrap());
        assert!(q.claim(p).await.unwrap());
        assert!(q.complete(p, 42).await.unwrap());

        let item = q.get(p).await.unwrap().unwrap();
        assert_eq!(item.state, WorkState::Completed);
        assert_eq!(item.last_result_count, Some(42));
        assert!(item.last_completed_at.is_some());
        assert_eq!(item.retry_count, 0);
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let (_dir, q) = queue(3);
        q.upsert_locations(&[location("a/b", 10)]).await.unwrap();
        q.request("a/b").await.unwrap();
        assert!(q.claim("a/b").await.unwrap());
        let before = q.get("a/b").await.unwrap().unwrap();

        assert!(!q.claim("a/b").await.unwrap());
        assert!(q.claim_next().await.unwrap().is_none());

        let after = q.get("a/b").await.unwrap().unwrap();
        assert_eq!(after.state, WorkState::Running);
        assert_eq!(after.retry_count, before.retry_count);
        assert_eq!(after.updated_at, before.updated_at);
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn failure_counts_retries_and_completion_clears_them() {
        let (_dir, q) = queue(3);
        q.upsert_locations(&[location("a/b", 10)]).await.unwrap();
        q.request("a/b").await.unwrap();
        q.claim("a/b").await.unwrap();
        assert!(q.fail("a/b", "HTTP 503").await.unwrap());

        let item = q.get("a/b").await.unwrap().unwrap();
        assert_eq!(item.state, WorkState::Error);
        assert_eq!(item.retry_count, 1);
        assert_eq!(item.last_error.as_deref(), Some("HTTP 503"));

        assert!(q.requeue("a/b").await.unwrap());
        q.claim("a/b").await.unwrap();
        q.complete("a/b", 3).await.unwrap();
        let item = q.get("a/b").await.unwrap().unwrap();
        assert_eq!(item.retry_count, 0);
        assert_eq!(item.last_error, None);
    }

    #[tokio::test]
    async fn requeue_is_refused_at_the_retry_cap() {
        let (_dir, q) = queue(1);
        q.upsert_locations(&[location("a/b", 10)]).await.unwrap();
        q.request("a/b").await.unwrap();
        q.claim("a/b").await.unwrap();
        q.fail("a/b", "boom").await.unwrap();

        assert!(!q.requeue("a/b").await.unwrap());
        assert!(q.requeue_failed().await.unwrap().is_empty());
        let item = q.get("a/b").await.unwrap().unwrap();
        assert_eq!(item.state, WorkState::Error);
        assert_eq!(item.retry_count, 1);

        // An explicit external request still goes through.
        assert!(q.request("a/b").await.unwrap());
    }

    #[tokio::test]
    async fn skip_and_reset_apply_from_any_state() {
        let (_dir, q) = queue(3);
        q.upsert_locations(&[location("a/b", 10)]).await.unwrap();
        q.request("a/b").await.unwrap();
        q.claim("a/b").await.unwrap();
        q.fail("a/b", "boom").await.unwrap();

        assert!(q.set_status("a/b", AdminAction::Skip).await.unwrap());
        assert_eq!(state(&q, "a/b").await, WorkState::Skip);
        assert!(!q.request("a/b").await.unwrap(), "skipped items are not schedulable");

        assert!(q.set_status("a/b", AdminAction::Reset).await.unwrap());
        let item = q.get("a/b").await.unwrap().unwrap();
        assert_eq!(item.state, WorkState::Ready);
        assert_eq!(item.retry_count, 0);
        assert_eq!(item.last_error, None);

        let err = q.set_status("x/y", AdminAction::Pending).await.unwrap_err();
        assert!(matches!(err, ScraperError::UnknownLocation(_)));
    }

    #[tokio::test]
    async fn claim_next_prefers_priority_then_size() {
        let (_dir, q) = queue(3);
        q.upsert_locations(&[location("a/small", 20), location("a/big", 900), location("a/mid", 150), location("a/mid2", 300)])
            .await
            .unwrap();
        for p in ["a/small", "a/big", "a/mid", "a/mid2"] {
            q.request(p).await.unwrap();
        }
        let order: Vec<String> = {
            let mut out = Vec::new();
            while let Some(item) = q.claim_next().await.unwrap() {
                out.push(item.location.path.clone());
            }
            out
        };
        assert_eq!(order, vec!["a/big", "a/mid2", "a/mid", "a/small"]);
    }

    #[tokio::test]
    async fn upsert_refreshes_attributes_without_touching_state() {
        let (_dir, q) = queue(3);
        let first = q.upsert_locations(&[location("a/b", 10)]).await.unwrap();
        assert_eq!(first, UpsertSummary { inserted: 1, updated: 0 });
        q.request("a/b").await.unwrap();

        let second = q.upsert_locations(&[location("a/b", 600), location("a/c", 1)]).await.unwrap();
        assert_eq!(second, UpsertSummary { inserted: 1, updated: 1 });
        let item = q.get("a/b").await.unwrap().unwrap();
        assert_eq!(item.state, WorkState::Pending);
        assert_eq!(item.location.expected_entries, 600);
        assert_eq!(item.location.priority.as_str(), "high");
    }

    #[tokio::test]
    async fn expired_running_items_are_released() {
        let (_dir, q) = queue(3);
        let q = q.with_stale_after(Duration::from_millis(20));
        q.upsert_locations(&[location("a/b", 10), location("a/c", 10)]).await.unwrap();
        q.request("a/b").await.unwrap();
        q.claim("a/b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(q.release_stale_running().await.unwrap(), 1);
        let item = q.get("a/b").await.unwrap().unwrap();
        assert_eq!(item.state, WorkState::Error);
        assert_eq!(item.last_error.as_deref(), Some(INTERRUPTED_REASON));

        let stats = q.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.count(WorkState::Error), 1);
        assert_eq!(stats.count(WorkState::Ready), 1);
        assert_eq!(stats.count(WorkState::Running), 0);
    }

    #[tokio::test]
    async fn live_running_items_keep_their_claim() {
        let (_dir, q) = queue(3);
        q.upsert_locations(&[location("a/b", 10)]).await.unwrap();
        q.request("a/b").await.unwrap();
        q.claim("a/b").await.unwrap();

        assert_eq!(q.release_stale_running().await.unwrap(), 0);
        let item = q.get("a/b").await.unwrap().unwrap();
        assert_eq!(item.state, WorkState::Running);
        assert_eq!(item.retry_count, 0);
    }

    #[tokio::test]
    async fn heartbeat_extends_the_lease() {
        let (_dir, q) = queue(3);
        let q = q.with_stale_after(Duration::from_millis(50));
        q.upsert_locations(&[location("a/b", 10), location("a/c", 10)]).await.unwrap();
        q.request("a/b").await.unwrap();
        q.claim("a/b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(q.heartbeat("a/b").await.unwrap());
        assert_eq!(q.release_stale_running().await.unwrap(), 0);
        assert_eq!(state(&q, "a/b").await, WorkState::Running);
        assert!(!q.heartbeat("a/c").await.unwrap(), "only running items take heartbeats");
    }

    #[tokio::test]
    async fn list_filters_by_state() {
        let (_dir, q) = queue(3);
        q.upsert_locations(&[location("a/b", 10), location("a/c", 10)]).await.unwrap();
        q.request("a/c").await.unwrap();
        let pending = q.list(Some(WorkState::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].path(), "a/c");
        assert_eq!(q.list(None).await.unwrap().len(), 2);
    }

    #[test]
    fn admin_actions_parse() {
        assert_eq!("pending".parse::<AdminAction>().unwrap(), AdminAction::Pending);
        assert_eq!("Skip".parse::<AdminAction>().unwrap(), AdminAction::Skip);
        assert_eq!("reset".parse::<AdminAction>().unwrap(), AdminAction::Reset);
        assert!("delete".parse::<AdminAction>().is_err());
    }
}
