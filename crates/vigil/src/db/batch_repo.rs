//! Batch repository for the `batches` table.
//!
//! Every status change is a conditional update; the returned `bool` / row
//! count tells the caller whether the precondition still held. The `*_with`
//! variants take a bare connection so they can join a transaction.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::{Database, DatabaseError};
use crate::model::{BatchStatus, ExecutionMode, ItemStatus};

/// A raw batch row.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRow {
    pub id: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub operator: String,
    pub mode: String,
    pub host: String,
    pub item_count: i64,
    pub status: String,
    pub progress: i64,
    pub max_workers: i64,
    pub total_filed: Option<i64>,
    pub total_not_found: Option<i64>,
    pub heartbeat_at: Option<String>,
}

impl BatchRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            operator: row.get("operator")?,
            mode: row.get("mode")?,
            host: row.get("host")?,
            item_count: row.get("item_count")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            max_workers: row.get("max_workers")?,
            total_filed: row.get("total_filed")?,
            total_not_found: row.get("total_not_found")?,
            heartbeat_at: row.get("heartbeat_at")?,
        })
    }

    /// Parsed status.
    pub fn status(&self) -> Result<BatchStatus, DatabaseError> {
        self.status
            .parse()
            .map_err(|value| DatabaseError::InvalidValue {
                column: "batches.status",
                value,
            })
    }
}

/// Values for a batch about to be created.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub id: String,
    pub operator: String,
    pub mode: ExecutionMode,
    pub host: String,
    pub item_count: i64,
    pub created_at: String,
}

fn non_terminal_sql() -> String {
    BatchStatus::sql_set(&BatchStatus::NON_TERMINAL)
}

/// Inserts a new batch in `queued` state.
pub fn insert_with(conn: &Connection, batch: &NewBatch) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO batches (id, created_at, operator, mode, host, item_count, status,
         progress, max_workers)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', 0, 1)",
        params![
            batch.id,
            batch.created_at,
            batch.operator,
            batch.mode.as_str(),
            batch.host,
            batch.item_count,
        ],
    )?;
    Ok(())
}

pub fn insert(db: &Database, batch: &NewBatch) -> Result<(), DatabaseError> {
    db.with_conn(|conn| insert_with(conn, batch))
}

/// Finds a batch by id.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<BatchRow>, DatabaseError> {
    db.with_conn(|conn| find_by_id_with(conn, id))
}

pub fn find_by_id_with(conn: &Connection, id: &str) -> Result<Option<BatchRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM batches WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], BatchRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Most recent batches first.
pub fn list(db: &Database, limit: u32) -> Result<Vec<BatchRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM batches ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], BatchRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Batches whose status is one of `statuses`, oldest first.
pub fn list_by_status(
    db: &Database,
    statuses: &[BatchStatus],
) -> Result<Vec<BatchRow>, DatabaseError> {
    let set = BatchStatus::sql_set(statuses);
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT * FROM batches WHERE status IN ({}) ORDER BY created_at ASC, rowid ASC",
            set
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], BatchRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// The batch currently holding the worker slot, if any: `starting` or
/// `running` and not yet completed.
pub fn find_active(db: &Database) -> Result<Option<BatchRow>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT * FROM batches WHERE status IN ({}) AND completed_at IS NULL
             ORDER BY created_at ASC, rowid ASC LIMIT 1",
            BatchStatus::sql_set(&BatchStatus::ACTIVE)
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map([], BatchRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// The oldest batch waiting for a worker.
pub fn oldest_queued(db: &Database) -> Result<Option<BatchRow>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT * FROM batches WHERE status IN ({}) AND completed_at IS NULL
             ORDER BY created_at ASC, rowid ASC LIMIT 1",
            BatchStatus::sql_set(&[BatchStatus::Queued])
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map([], BatchRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// `queued → starting`, stamping `started_at`.
pub fn mark_starting(db: &Database, id: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE batches SET status = 'starting', started_at = ?2
             WHERE id = ?1 AND status IN ({}) AND completed_at IS NULL",
            BatchStatus::transition_guard(&[BatchStatus::Queued], BatchStatus::Starting)
        );
        let n = conn.execute(&sql, params![id, now])?;
        Ok(n > 0)
    })
}

/// `starting → queued`, used when a launch could not be carried out.
pub fn revert_to_queued(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE batches SET status = 'queued', started_at = NULL
             WHERE id = ?1 AND status IN ({}) AND completed_at IS NULL",
            BatchStatus::transition_guard(&[BatchStatus::Starting], BatchStatus::Queued)
        );
        let n = conn.execute(&sql, params![id])?;
        Ok(n > 0)
    })
}

/// `{starting, running} → queued`. Terminal and already queued batches are
/// left alone.
pub fn requeue_active_with(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE batches SET status = 'queued', started_at = NULL
         WHERE id = ?1 AND status IN ({}) AND completed_at IS NULL",
        BatchStatus::transition_guard(&BatchStatus::ACTIVE, BatchStatus::Queued)
    );
    let n = conn.execute(&sql, params![id])?;
    Ok(n > 0)
}

/// Any non-terminal status → `error`, stamping `completed_at`.
pub fn force_error_with(conn: &Connection, id: &str, now: &str) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE batches SET status = 'error', completed_at = ?2
         WHERE id = ?1 AND status IN ({}) AND completed_at IS NULL",
        BatchStatus::transition_guard(&BatchStatus::NON_TERMINAL, BatchStatus::Error)
    );
    let n = conn.execute(&sql, params![id, now])?;
    Ok(n > 0)
}

/// Any non-terminal status → `done` with outcome tallies, stamping
/// `completed_at`. Progress is raised to the number of done items.
pub fn finalize_with(
    conn: &Connection,
    id: &str,
    now: &str,
    total_filed: i64,
    total_not_found: i64,
) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE batches SET status = 'done', completed_at = ?2,
             total_filed = ?3, total_not_found = ?4,
             progress = MAX(progress, (SELECT COUNT(*) FROM items
                                       WHERE items.batch_id = batches.id
                                         AND items.status = 'done'))
         WHERE id = ?1 AND status IN ({}) AND completed_at IS NULL",
        BatchStatus::transition_guard(&BatchStatus::NON_TERMINAL, BatchStatus::Done)
    );
    let n = conn.execute(&sql, params![id, now, total_filed, total_not_found])?;
    Ok(n > 0)
}

/// Rewrites the outcome tallies of a batch regardless of status.
pub fn set_tallies_with(
    conn: &Connection,
    id: &str,
    total_filed: i64,
    total_not_found: i64,
) -> Result<bool, DatabaseError> {
    let n = conn.execute(
        "UPDATE batches SET total_filed = ?2, total_not_found = ?3 WHERE id = ?1",
        params![id, total_filed, total_not_found],
    )?;
    Ok(n > 0)
}

/// `{done, error} → queued`, clearing `completed_at`. Administrative only.
pub fn reopen_with(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE batches SET status = 'queued', completed_at = NULL, started_at = NULL
         WHERE id = ?1 AND status IN ({})",
        BatchStatus::transition_guard(&[BatchStatus::Done, BatchStatus::Error], BatchStatus::Queued)
    );
    let n = conn.execute(&sql, params![id])?;
    Ok(n > 0)
}

/// Worker heartbeat.
pub fn touch_heartbeat(db: &Database, id: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE batches SET heartbeat_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(n > 0)
    })
}

/// Raises `progress` of every non-terminal batch to its done item count.
/// Never lowers it. Returns the number of batches changed.
pub fn catch_up_progress(db: &Database) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE batches SET progress = (
                 SELECT COUNT(*) FROM items
                 WHERE items.batch_id = batches.id AND items.status = 'done')
             WHERE status IN ({}) AND completed_at IS NULL
               AND progress < (
                 SELECT COUNT(*) FROM items
                 WHERE items.batch_id = batches.id AND items.status = 'done')",
            non_terminal_sql()
        );
        Ok(conn.execute(&sql, [])?)
    })
}

/// Ids of non-terminal batches that have items, all of them terminal.
pub fn finished_unsettled(db: &Database) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT b.id FROM batches b
             WHERE b.status IN ({}) AND b.completed_at IS NULL
               AND EXISTS (SELECT 1 FROM items i WHERE i.batch_id = b.id)
               AND NOT EXISTS (SELECT 1 FROM items i
                               WHERE i.batch_id = b.id AND i.status IN ({}))
             ORDER BY b.created_at ASC",
            non_terminal_sql(),
            ItemStatus::sql_set(&ItemStatus::NON_TERMINAL)
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map([], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    })
}

/// Number of batches in any of `statuses`.
pub fn count_in(db: &Database, statuses: &[BatchStatus]) -> Result<u64, DatabaseError> {
    let set = BatchStatus::sql_set(statuses);
    db.with_conn(|conn| {
        let sql = format!("SELECT COUNT(*) FROM batches WHERE status IN ({})", set);
        let count: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(count as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_batch(id: &str, created_at: &str) -> NewBatch {
        NewBatch {
            id: id.to_string(),
            operator: "alice".to_string(),
            mode: ExecutionMode::Headless,
            host: "desk-01".to_string(),
            item_count: 2,
            created_at: created_at.to_string(),
        }
    }

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &new_batch("b1", "2026-01-01 10:00:00")).unwrap();
        insert(&db, &new_batch("b2", "2026-01-01 11:00:00")).unwrap();
        db
    }

    #[test]
    fn test_insert_defaults() {
        let db = setup();
        let b = find_by_id(&db, "b1").unwrap().unwrap();
        assert_eq!(b.status().unwrap(), BatchStatus::Queued);
        assert_eq!(b.progress, 0);
        assert_eq!(b.max_workers, 1);
        assert!(b.completed_at.is_none());
        assert!(find_by_id(&db, "nope").unwrap().is_none());
    }

    #[test]
    fn test_oldest_queued_and_list_order() {
        let db = setup();
        assert_eq!(oldest_queued(&db).unwrap().unwrap().id, "b1");
        let ids: Vec<String> = list(&db, 10).unwrap().into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["b2", "b1"]);
    }

    #[test]
    fn test_mark_starting_is_conditional() {
        let db = setup();
        assert!(mark_starting(&db, "b1", "2026-01-01 12:00:00").unwrap());
        assert!(!mark_starting(&db, "b1", "2026-01-01 12:00:01").unwrap());

        let b = find_by_id(&db, "b1").unwrap().unwrap();
        assert_eq!(b.status, "starting");
        assert_eq!(b.started_at.as_deref(), Some("2026-01-01 12:00:00"));
        assert_eq!(find_active(&db).unwrap().unwrap().id, "b1");
        assert_eq!(oldest_queued(&db).unwrap().unwrap().id, "b2");
    }

    #[test]
    fn test_revert_only_from_starting() {
        let db = setup();
        assert!(!revert_to_queued(&db, "b1").unwrap());
        mark_starting(&db, "b1", "2026-01-01 12:00:00").unwrap();
        assert!(revert_to_queued(&db, "b1").unwrap());
        let b = find_by_id(&db, "b1").unwrap().unwrap();
        assert_eq!(b.status, "queued");
        assert!(b.started_at.is_none());
    }

    #[test]
    fn test_terminal_batches_are_not_touched() {
        let db = setup();
        db.with_conn(|c| force_error_with(c, "b1", "2026-01-01 12:00:00"))
            .unwrap();
        let completed = find_by_id(&db, "b1").unwrap().unwrap().completed_at;

        assert!(!db.with_conn(|c| force_error_with(c, "b1", "2026-01-02 00:00:00")).unwrap());
        assert!(!db
            .with_conn(|c| finalize_with(c, "b1", "2026-01-02 00:00:00", 1, 1))
            .unwrap());
        assert!(!db.with_conn(|c| requeue_active_with(c, "b1")).unwrap());
        assert!(!mark_starting(&db, "b1", "2026-01-02 00:00:00").unwrap());
        assert_eq!(find_by_id(&db, "b1").unwrap().unwrap().completed_at, completed);
    }

    #[test]
    fn test_reopen_terminal_batch() {
        let db = setup();
        assert!(!db.with_conn(|c| reopen_with(c, "b1")).unwrap());
        db.with_conn(|c| finalize_with(c, "b1", "2026-01-01 12:00:00", 3, 1))
            .unwrap();
        let b = find_by_id(&db, "b1").unwrap().unwrap();
        assert_eq!(b.status, "done");
        assert_eq!(b.total_filed, Some(3));
        assert_eq!(b.total_not_found, Some(1));

        assert!(db.with_conn(|c| reopen_with(c, "b1")).unwrap());
        let b = find_by_id(&db, "b1").unwrap().unwrap();
        assert_eq!(b.status, "queued");
        assert!(b.completed_at.is_none());
    }

    #[test]
    fn test_legacy_pending_counts_as_queued() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|c| {
            c.execute(
                "INSERT INTO batches (id, created_at, status) VALUES ('old', '2025-01-01 00:00:00', 'pending')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        assert_eq!(oldest_queued(&db).unwrap().unwrap().id, "old");
        assert_eq!(count_in(&db, &[BatchStatus::Queued]).unwrap(), 1);
        assert!(mark_starting(&db, "old", "2026-01-01 00:00:00").unwrap());
    }

    #[test]
    fn test_count_and_list_by_status() {
        let db = setup();
        mark_starting(&db, "b2", "2026-01-01 12:00:00").unwrap();
        assert_eq!(count_in(&db, &BatchStatus::ACTIVE).unwrap(), 1);
        assert_eq!(count_in(&db, &BatchStatus::NON_TERMINAL).unwrap(), 2);
        let starting = list_by_status(&db, &[BatchStatus::Starting]).unwrap();
        assert_eq!(starting.len(), 1);
        assert_eq!(starting[0].id, "b2");
    }

    #[test]
    fn test_heartbeat() {
        let db = setup();
        assert!(touch_heartbeat(&db, "b1", "2026-01-01 10:05:00").unwrap());
        assert_eq!(
            find_by_id(&db, "b1").unwrap().unwrap().heartbeat_at.as_deref(),
            Some("2026-01-01 10:05:00")
        );
    }
}
