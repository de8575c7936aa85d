//! Append-only log entries shared by the worker and the orchestrator.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::{Database, DatabaseError};
use crate::model::ORCHESTRATOR_WORKER_ID;

/// A raw log row.
#[derive(Debug, Clone, Serialize)]
pub struct LogRow {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub message: String,
    pub detail: Option<String>,
    pub batch_id: Option<String>,
    pub worker_id: Option<String>,
}

impl LogRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
            level: row.get("level")?,
            message: row.get("message")?,
            detail: row.get("detail")?,
            batch_id: row.get("batch_id")?,
            worker_id: row.get("worker_id")?,
        })
    }
}

/// A log entry about to be appended.
#[derive(Debug, Clone)]
pub struct NewLogEntry<'a> {
    pub timestamp: &'a str,
    pub level: &'a str,
    pub message: &'a str,
    pub detail: Option<&'a str>,
    pub batch_id: Option<&'a str>,
    pub worker_id: Option<&'a str>,
}

impl<'a> NewLogEntry<'a> {
    /// An entry written by the orchestrator itself. These never count as
    /// worker activity.
    pub fn orchestrator(timestamp: &'a str, level: &'a str, message: &'a str) -> Self {
        Self {
            timestamp,
            level,
            message,
            detail: None,
            batch_id: None,
            worker_id: Some(ORCHESTRATOR_WORKER_ID),
        }
    }

    pub fn batch(mut self, batch_id: &'a str) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn detail(mut self, detail: &'a str) -> Self {
        self.detail = Some(detail);
        self
    }
}

pub fn append_with(conn: &Connection, entry: &NewLogEntry<'_>) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO logs (timestamp, level, message, detail, batch_id, worker_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.timestamp,
            entry.level,
            entry.message,
            entry.detail,
            entry.batch_id,
            entry.worker_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Appends an entry and returns its id.
pub fn append(db: &Database, entry: &NewLogEntry<'_>) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| append_with(conn, entry))
}

/// The last `limit` entries of a batch in chronological order.
pub fn list_for_batch(
    db: &Database,
    batch_id: &str,
    limit: u32,
) -> Result<Vec<LogRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM (
                 SELECT * FROM logs WHERE batch_id = ?1 ORDER BY id DESC LIMIT ?2
             ) ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![batch_id, limit], LogRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Messages of a batch logged at or after `since`.
pub fn messages_since(
    db: &Database,
    batch_id: &str,
    since: &str,
) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT message FROM logs
             WHERE batch_id = ?1 AND datetime(timestamp) >= datetime(?2)
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![batch_id, since], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    })
}

/// Timestamp of the newest entry of a batch that was not written by the
/// orchestrator, normalised to `YYYY-MM-DD HH:MM:SS`.
pub fn last_worker_activity(db: &Database, batch_id: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let ts: Option<String> = conn.query_row(
            "SELECT MAX(datetime(timestamp)) FROM logs
             WHERE batch_id = ?1 AND (worker_id IS NULL OR worker_id <> ?2)",
            params![batch_id, ORCHESTRATOR_WORKER_ID],
            |r| r.get(0),
        )?;
        Ok(ts)
    })
}
