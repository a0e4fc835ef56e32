use crate::error::Result;
use crate::types::{Location, WorkItem, WorkState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// A guarded state change on one queue row.
///
/// The store applies it as a single conditional update: the row moves only if
/// its current state is in `allowed_from()` (and, for `Requeue`, its retry
/// count is under the cap). Otherwise nothing changes.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Request,
    Claim,
    Complete { result_count: u32 },
    Fail { message: String },
    Requeue { max_retries: u32 },
    Skip,
    Reset,
}

impl Transition {
    pub fn allowed_from(&self) -> &'static [WorkState] {
        match self {
            Transition::Request => &[WorkState::Ready, WorkState::Error],
            Transition::Claim => &[WorkState::Pending],
            Transition::Complete { .. } | Transition::Fail { .. } => &[WorkState::Running],
            Transition::Requeue { .. } => &[WorkState::Error],
            Transition::Skip | Transition::Reset => &WorkState::ALL,
        }
    }

    pub fn target(&self) -> WorkState {
        match self {
            Transition::Request | Transition::Requeue { .. } => WorkState::Pending,
            Transition::Claim => WorkState::Running,
            Transition::Complete { .. } => WorkState::Completed,
            Transition::Fail { .. } => WorkState::Error,
            Transition::Skip => WorkState::Skip,
            Transition::Reset => WorkState::Ready,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transition::Request => "request",
            Transition::Claim => "claim",
            Transition::Complete { .. } => "complete",
            Transition::Fail { .. } => "fail",
            Transition::Requeue { .. } => "requeue",
            Transition::Skip => "skip",
            Transition::Reset => "reset",
        }
    }
}

/// Rows inserted vs. existing rows whose discovery attributes were refreshed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

/// Item count per state; every state is present, zero if empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: u64,
    pub by_state: BTreeMap<String, u64>,
}

impl QueueStats {
    pub fn count(&self, state: WorkState) -> u64 {
        self.by_state.get(state.as_str()).copied().unwrap_or(0)
    }
}

/// Durable storage for work items.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn upsert_locations(&self, locations: &[Location]) -> Result<UpsertSummary>;

    /// Apply a guarded transition; `Ok(false)` when refused.
    async fn apply(&self, path: &str, transition: &Transition) -> Result<bool>;

    /// Claim the highest-priority pending item, if any.
    async fn claim_next(&self) -> Result<Option<WorkItem>>;

    /// `error` → `pending` for every item under the retry cap; returns the paths moved.
    async fn requeue_failed(&self, max_retries: u32) -> Result<Vec<String>>;

    /// Refresh the lease of a `running` item; `Ok(false)` if it is no longer running.
    async fn heartbeat(&self, path: &str) -> Result<bool>;

    /// `running` → `error` for items whose last update is older than
    /// `stale_before`; returns how many rows moved.
    async fn release_running(&self, reason: &str, stale_before: DateTime<Utc>) -> Result<u64>;

    async fn get(&self, path: &str) -> Result<Option<WorkItem>>;

    /// Items ordered by priority tier, then expected entries (largest first).
    async fn list(&self, state: Option<WorkState>) -> Result<Vec<WorkItem>>;

    async fn stats(&self) -> Result<QueueStats>;
}
