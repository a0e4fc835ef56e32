use crate::error::{Result, ScraperError};
use crate::types::VenueRecord;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Destination for the validated records of one run.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Append a run's records; returns how many were written.
    async fn persist(&self, run_id: &str, records: &[VenueRecord]) -> Result<usize>;

    async fn count_for_location(&self, location_path: &str) -> Result<usize>;
}

/// Append-only `venue_records` table; every row is tagged with its run id.
pub struct SqliteRecordSink {
    conn: Mutex<Connection>,
}

impl SqliteRecordSink {
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
            CREATE TABLE IF NOT EXISTS venue_records (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id         TEXT NOT NULL,
                location_path  TEXT NOT NULL,
                source_id      TEXT NOT NULL,
                name           TEXT NOT NULL,
                category       TEXT NOT NULL,
                page_number    INTEGER NOT NULL,
                extracted_at   TEXT NOT NULL,
                record_json    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_venue_records_location ON venue_records (location_path);
            CREATE INDEX IF NOT EXISTS idx_venue_records_run ON venue_records (run_id);
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

#[async_trait]
impl RecordSink for SqliteRecordSink {
    async fn persist(&self, run_id: &str, records: &[VenueRecord]) -> Result<usize> {
        let mut conn = self.conn.lock().map_err(|_| ScraperError::Api {
            message: "record database lock poisoned".to_string(),
        })?;
        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO venue_records
                    (run_id, location_path, source_id, name, category, page_number, extracted_at, record_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for record in records {
                insert.execute(params![
                    run_id,
                    record.location_path,
                    record.source_id,
                    record.name,
                    record.category.as_str(),
                    record.page_number as i64,
                    record.extracted_at.to_rfc3339(),
                    serde_json::to_string(record)?,
                ])?;
            }
        }
        tx.commit()?;
        debug!(run_id, count = records.len(), "persisted venue records");
        Ok(records.len())
    }

    async fn count_for_location(&self, location_path: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| ScraperError::Api {
            message: "record database lock poisoned".to_string(),
        })?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM venue_records WHERE location_path = ?1",
            params![location_path],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// In-memory sink for development and testing.
#[derive(Default, Clone)]
pub struct InMemoryRecordSink {
    runs: Arc<Mutex<Vec<(String, VenueRecord)>>>,
}

impl InMemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<VenueRecord> {
        self.runs
            .lock()
            .map(|runs| runs.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordSink for InMemoryRecordSink {
    async fn persist(&self, run_id: &str, records: &[VenueRecord]) -> Result<usize> {
        let mut runs = self.runs.lock().map_err(|_| ScraperError::Api {
            message: "in-memory sink lock poisoned".to_string(),
        })?;
        runs.extend(records.iter().map(|r| (run_id.to_string(), r.clone())));
        Ok(records.len())
    }

    async fn count_for_location(&self, location_path: &str) -> Result<usize> {
        Ok(self
            .records()
            .iter()
            .filter(|r| r.location_path == location_path)
            .count())
    }
}
