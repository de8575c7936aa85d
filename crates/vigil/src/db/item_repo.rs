//! Item repository for the `items` table.

use std::collections::HashMap;

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::{Database, DatabaseError};
use crate::model::ItemStatus;

/// A raw item row.
#[derive(Debug, Clone, Serialize)]
pub struct ItemRow {
    pub id: i64,
    pub batch_id: String,
    pub source_ref: String,
    pub case_number: String,
    pub sub_identifier: String,
    pub status: String,
    pub message: String,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            batch_id: row.get("batch_id")?,
            source_ref: row.get("source_ref")?,
            case_number: row.get("case_number")?,
            sub_identifier: row.get("sub_identifier")?,
            status: row.get("status")?,
            message: row.get("message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Parsed status.
    pub fn status(&self) -> Result<ItemStatus, DatabaseError> {
        self.status
            .parse()
            .map_err(|value| DatabaseError::InvalidValue {
                column: "items.status",
                value,
            })
    }

    /// Time of the last transition, falling back to creation time.
    pub fn last_touched(&self) -> &str {
        self.updated_at.as_deref().unwrap_or(&self.created_at)
    }
}

/// Values for an item about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub source_ref: String,
    pub case_number: String,
    pub sub_identifier: String,
}

/// Per-status item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub running: u64,
    pub done: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.done + self.failed
    }

    fn add(&mut self, status: &str, count: u64) {
        match status.parse::<ItemStatus>() {
            Ok(ItemStatus::Pending) => self.pending += count,
            Ok(ItemStatus::Running) => self.running += count,
            Ok(ItemStatus::Done) => self.done += count,
            Ok(ItemStatus::Failed) => self.failed += count,
            Err(other) => log::warn!("Ignoring item status '{}' in counts", other),
        }
    }
}

/// Inserts `items` as `pending` members of `batch_id`.
pub fn insert_many_with(
    conn: &Connection,
    batch_id: &str,
    items: &[NewItem],
    now: &str,
) -> Result<usize, DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO items (batch_id, source_ref, case_number, sub_identifier, status,
         message, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', '', ?5, ?5)",
    )?;
    for item in items {
        stmt.execute(params![
            batch_id,
            item.source_ref,
            item.case_number,
            item.sub_identifier,
            now,
        ])?;
    }
    Ok(items.len())
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM items WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], ItemRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Items of a batch in insertion order.
pub fn list_for_batch(db: &Database, batch_id: &str) -> Result<Vec<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM items WHERE batch_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![batch_id], ItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// All items in `status` across batches, oldest first.
pub fn list_by_status(db: &Database, status: ItemStatus) -> Result<Vec<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM items WHERE status = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![status.as_str()], ItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// `done` items that no result row references yet.
pub fn done_without_result(db: &Database) -> Result<Vec<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT i.* FROM items i
             WHERE i.status = 'done'
               AND NOT EXISTS (SELECT 1 FROM results r WHERE r.item_id = i.id)
             ORDER BY i.id",
        )?;
        let rows = stmt
            .query_map([], ItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// `running → pending` with a recovery message.
pub fn reset_to_pending_with(
    conn: &Connection,
    id: i64,
    message: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE items SET status = 'pending', message = ?2, updated_at = ?3
         WHERE id = ?1 AND status IN ({})",
        ItemStatus::transition_guard(&[ItemStatus::Running], ItemStatus::Pending)
    );
    let n = conn.execute(&sql, params![id, message, now])?;
    Ok(n > 0)
}

/// Fails every non-terminal item of a batch.
pub fn fail_non_terminal_with(
    conn: &Connection,
    batch_id: &str,
    message: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    let sql = format!(
        "UPDATE items SET status = 'failed', message = ?2, updated_at = ?3
         WHERE batch_id = ?1 AND status IN ({})",
        ItemStatus::transition_guard(&ItemStatus::NON_TERMINAL, ItemStatus::Failed)
    );
    Ok(conn.execute(&sql, params![batch_id, message, now])?)
}

/// `failed → pending` for every failed item of a batch.
pub fn requeue_failed_with(
    conn: &Connection,
    batch_id: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    let sql = format!(
        "UPDATE items SET status = 'pending', message = '', updated_at = ?2
         WHERE batch_id = ?1 AND status IN ({})",
        ItemStatus::transition_guard(&[ItemStatus::Failed], ItemStatus::Pending)
    );
    Ok(conn.execute(&sql, params![batch_id, now])?)
}

/// Item counts per status for one batch.
pub fn counts_for_batch(db: &Database, batch_id: &str) -> Result<StatusCounts, DatabaseError> {
    db.with_conn(|conn| counts_for_batch_with(conn, batch_id))
}

pub fn counts_for_batch_with(
    conn: &Connection,
    batch_id: &str,
) -> Result<StatusCounts, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT status, COUNT(*) FROM items WHERE batch_id = ?1 GROUP BY status")?;
    let rows = stmt
        .query_map(params![batch_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts = StatusCounts::default();
    for (status, count) in rows {
        counts.add(&status, count as u64);
    }
    Ok(counts)
}

/// Item counts per status for every batch that has items.
pub fn counts_by_batch(db: &Database) -> Result<HashMap<String, StatusCounts>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT batch_id, status, COUNT(*) FROM items GROUP BY batch_id, status")?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut map: HashMap<String, StatusCounts> = HashMap::new();
        for (batch_id, status, count) in rows {
            map.entry(batch_id).or_default().add(&status, count as u64);
        }
        Ok(map)
    })
}

/// Number of items in `status` across all batches.
pub fn count_by_status(db: &Database, status: ItemStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::batch_repo::{self, NewBatch};
    use crate::model::ExecutionMode;

    fn item(source: &str) -> NewItem {
        NewItem {
            source_ref: source.to_string(),
            case_number: String::new(),
            sub_identifier: String::new(),
        }
    }

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.with_transaction(|conn| {
            batch_repo::insert_with(
                conn,
                &NewBatch {
                    id: "b1".to_string(),
                    operator: String::new(),
                    mode: ExecutionMode::Headless,
                    host: String::new(),
                    item_count: 3,
                    created_at: "2026-01-01 10:00:00".to_string(),
                },
            )?;
            insert_many_with(
                conn,
                "b1",
                &[item("a.pdf"), item("b.pdf"), item("c.pdf")],
                "2026-01-01 10:00:00",
            )
        })
        .unwrap();
        db
    }

    fn set_status(db: &Database, id: i64, status: &str) {
        db.with_conn(|c| {
            c.execute(
                "UPDATE items SET status = ?2 WHERE id = ?1",
                params![id, status],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_insert_many_pending() {
        let db = setup();
        let items = list_for_batch(&db, "b1").unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.status == "pending"));
        assert_eq!(items[0].source_ref, "a.pdf");
        assert_eq!(items[0].last_touched(), "2026-01-01 10:00:00");
    }

    #[test]
    fn test_reset_only_running() {
        let db = setup();
        assert!(!db
            .with_conn(|c| reset_to_pending_with(c, 1, "retry", "2026-01-01 10:10:00"))
            .unwrap());
        set_status(&db, 1, "running");
        assert!(db
            .with_conn(|c| reset_to_pending_with(c, 1, "retry", "2026-01-01 10:10:00"))
            .unwrap());
        let i = find_by_id(&db, 1).unwrap().unwrap();
        assert_eq!(i.status().unwrap(), ItemStatus::Pending);
        assert_eq!(i.message, "retry");
        assert_eq!(i.updated_at.as_deref(), Some("2026-01-01 10:10:00"));
    }

    #[test]
    fn test_fail_non_terminal_keeps_done() {
        let db = setup();
        set_status(&db, 1, "done");
        set_status(&db, 2, "running");
        let n = db
            .with_conn(|c| fail_non_terminal_with(c, "b1", "timeout", "2026-01-01 11:00:00"))
            .unwrap();
        assert_eq!(n, 2);
        let counts = counts_for_batch(&db, "b1").unwrap();
        assert_eq!(counts.done, 1);
        assert_eq!(counts.failed, 2);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_requeue_failed() {
        let db = setup();
        set_status(&db, 2, "failed");
        let n = db
            .with_conn(|c| requeue_failed_with(c, "b1", "2026-01-01 11:00:00"))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(count_by_status(&db, ItemStatus::Pending).unwrap(), 3);
    }

    #[test]
    fn test_done_without_result() {
        let db = setup();
        set_status(&db, 1, "done");
        set_status(&db, 2, "done");
        db.with_conn(|c| {
            c.execute(
                "INSERT INTO results (item_id, batch_id, case_number, source_ref, outcome)
                 VALUES (2, 'b1', '', 'b.pdf', 'Protocolizada')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        let ids: Vec<i64> = done_without_result(&db).unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_counts_by_batch() {
        let db = setup();
        set_status(&db, 3, "running");
        let map = counts_by_batch(&db).unwrap();
        let counts = map.get("b1").unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.running, 1);
        assert_eq!(list_by_status(&db, ItemStatus::Running).unwrap().len(), 1);
    }
}
