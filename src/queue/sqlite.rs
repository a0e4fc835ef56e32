use crate::error::{Result, ScraperError};
use crate::queue::store::{QueueStats, QueueStore, Transition, UpsertSummary};
use crate::types::{Location, PriorityTier, WorkItem, WorkState};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const ITEM_COLUMNS: &str = "path, name, region, url, expected_entries, priority, status, retry_count, \
                            last_error, last_completed_at, last_result_count, updated_at";

/// Queue store in a local SQLite file. All transitions are single conditional
/// `UPDATE` statements, so concurrent claimers never both win.
pub struct SqliteQueueStore {
    conn: Mutex<Connection>,
}

impl SqliteQueueStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=5000;
            CREATE TABLE IF NOT EXISTS work_items (
                path              TEXT PRIMARY KEY,
                name              TEXT NOT NULL,
                region            TEXT NOT NULL DEFAULT '',
                url               TEXT NOT NULL DEFAULT '',
                expected_entries  INTEGER NOT NULL DEFAULT 0,
                priority          TEXT NOT NULL,
                priority_rank     INTEGER NOT NULL,
                status            TEXT NOT NULL DEFAULT 'ready',
                retry_count       INTEGER NOT NULL DEFAULT 0,
                last_error        TEXT,
                last_completed_at INTEGER,
                last_result_count INTEGER,
                updated_at        INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_work_items_schedule
                ON work_items (status, priority_rank, expected_entries);
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ScraperError::Api {
            message: "queue database lock poisoned".to_string(),
        })
    }
}

fn state_list(states: &[WorkState]) -> String {
    states
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn apply_on(conn: &Connection, path: &str, transition: &Transition) -> Result<bool> {
    let now = Utc::now().timestamp_millis();
    let target = transition.target().as_str();
    let guard = format!("path = ?1 AND status IN ({})", state_list(transition.allowed_from()));

    let changed = match transition {
        Transition::Request | Transition::Claim | Transition::Skip => conn.execute(
            &format!("UPDATE work_items SET status = ?2, updated_at = ?3 WHERE {guard}"),
            params![path, target, now],
        )?,
        Transition::Complete { result_count } => conn.execute(
            &format!(
                "UPDATE work_items SET status = ?2, updated_at = ?3, retry_count = 0, last_error = NULL,
                        last_completed_at = ?3, last_result_count = ?4
                 WHERE {guard}"
            ),
            params![path, target, now, *result_count as i64],
        )?,
        Transition::Fail { message } => conn.execute(
            &format!(
                "UPDATE work_items SET status = ?2, updated_at = ?3, retry_count = retry_count + 1, last_error = ?4
                 WHERE {guard}"
            ),
            params![path, target, now, message],
        )?,
        Transition::Requeue { max_retries } => conn.execute(
            &format!("UPDATE work_items SET status = ?2, updated_at = ?3 WHERE {guard} AND retry_count < ?4"),
            params![path, target, now, *max_retries as i64],
        )?,
        Transition::Reset => conn.execute(
            &format!("UPDATE work_items SET status = ?2, updated_at = ?3, retry_count = 0, last_error = NULL WHERE {guard}"),
            params![path, target, now],
        )?,
    };
    Ok(changed == 1)
}

fn get_on(conn: &Connection, path: &str) -> Result<Option<WorkItem>> {
    let mut stmt = conn.prepare(&format!("SELECT {ITEM_COLUMNS} FROM work_items WHERE path = ?1"))?;
    let mut rows = stmt.query(params![path])?;
    let item = match rows.next()? {
        Some(row) => Some(row_to_item(row)?),
        None => None,
    };
    Ok(item)
}

fn first_pending(conn: &Connection) -> Result<Option<String>> {
    let mut stmt = conn.prepare(
        "SELECT path FROM work_items WHERE status = 'pending'
         ORDER BY priority_rank ASC, expected_entries DESC, updated_at ASC LIMIT 1",
    )?;
    let mut rows = stmt.query([])?;
    let path = match rows.next()? {
        Some(row) => Some(row.get::<_, String>(0)?),
        None => None,
    };
    Ok(path)
}

fn conversion_error(idx: usize, e: ScraperError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<WorkItem> {
    let priority: String = row.get(5)?;
    let status: String = row.get(6)?;
    let location = Location {
        path: row.get(0)?,
        name: row.get(1)?,
        region: row.get(2)?,
        url: row.get(3)?,
        expected_entries: row.get::<_, i64>(4)? as u32,
        priority: PriorityTier::from_str(&priority).map_err(|e| conversion_error(5, e))?,
    };
    Ok(WorkItem {
        location,
        state: WorkState::from_str(&status).map_err(|e| conversion_error(6, e))?,
        retry_count: row.get::<_, i64>(7)? as u32,
        last_error: row.get(8)?,
        last_completed_at: row.get::<_, Option<i64>>(9)?.and_then(millis_to_utc),
        last_result_count: row.get::<_, Option<i64>>(10)?.map(|n| n as u32),
        updated_at: millis_to_utc(row.get(11)?).unwrap_or_else(Utc::now),
    })
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn upsert_locations(&self, locations: &[Location]) -> Result<UpsertSummary> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut summary = UpsertSummary::default();
        let now = Utc::now().timestamp_millis();
        {
            let mut exists = tx.prepare("SELECT 1 FROM work_items WHERE path = ?1")?;
            let mut upsert = tx.prepare(
                "INSERT INTO work_items (path, name, region, url, expected_entries, priority, priority_rank, status, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'ready', ?8)
                 ON CONFLICT(path) DO UPDATE SET name=excluded.name, region=excluded.region, url=excluded.url,
                     expected_entries=excluded.expected_entries, priority=excluded.priority,
                     priority_rank=excluded.priority_rank",
            )?;
            for location in locations {
                if exists.exists(params![location.path])? {
                    summary.updated += 1;
                } else {
                    summary.inserted += 1;
                }
                upsert.execute(params![
                    location.path,
                    location.name,
                    location.region,
                    location.url,
                    location.expected_entries as i64,
                    location.priority.as_str(),
                    location.priority.rank(),
                    now,
                ])?;
            }
        }
        tx.commit()?;
        debug!(inserted = summary.inserted, updated = summary.updated, "upserted locations");
        Ok(summary)
    }

    async fn apply(&self, path: &str, transition: &Transition) -> Result<bool> {
        let conn = self.conn()?;
        apply_on(&conn, path, transition)
    }

    async fn claim_next(&self) -> Result<Option<WorkItem>> {
        let conn = self.conn()?;
        // Another process may claim the candidate between select and update;
        // the conditional update refuses and we look again.
        loop {
            let Some(path) = first_pending(&conn)? else {
                return Ok(None);
            };
            if apply_on(&conn, &path, &Transition::Claim)? {
                return get_on(&conn, &path);
            }
        }
    }

    async fn requeue_failed(&self, max_retries: u32) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "UPDATE work_items SET status = 'pending', updated_at = ?1
             WHERE status = 'error' AND retry_count < ?2
             RETURNING path",
        )?;
        let paths = stmt
            .query_map(params![Utc::now().timestamp_millis(), max_retries as i64], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
    }

    async fn heartbeat(&self, path: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE work_items SET updated_at = ?2 WHERE path = ?1 AND status = 'running'",
            params![path, Utc::now().timestamp_millis()],
        )?;
        Ok(changed == 1)
    }

    async fn release_running(&self, reason: &str, stale_before: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE work_items SET status = 'error', retry_count = retry_count + 1, last_error = ?1, updated_at = ?2
             WHERE status = 'running' AND updated_at < ?3",
            params![reason, Utc::now().timestamp_millis(), stale_before.timestamp_millis()],
        )?;
        Ok(changed as u64)
    }

    async fn get(&self, path: &str) -> Result<Option<WorkItem>> {
        let conn = self.conn()?;
        get_on(&conn, path)
    }

    async fn list(&self, state: Option<WorkState>) -> Result<Vec<WorkItem>> {
        let conn = self.conn()?;
        let order = "ORDER BY priority_rank ASC, expected_entries DESC, path ASC";
        let items = match state {
            Some(state) => {
                let mut stmt = conn.prepare(&format!("SELECT {ITEM_COLUMNS} FROM work_items WHERE status = ?1 {order}"))?;
                let rows = stmt.query_map(params![state.as_str()], row_to_item)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!("SELECT {ITEM_COLUMNS} FROM work_items {order}"))?;
                let rows = stmt.query_map([], row_to_item)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(items)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let conn = self.conn()?;
        let mut stats = QueueStats::default();
        for state in WorkState::ALL {
            stats.by_state.insert(state.as_str().to_string(), 0);
        }
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM work_items GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            stats.total += count as u64;
            stats.by_state.insert(status, count as u64);
        }
        Ok(stats)
    }
}
