//! Result repository for the `results` table.
//!
//! Rows are normally written by the external worker with `item_id` set.
//! Rows with a null `item_id` predate that column and are correlated to
//! items by the reconciler.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::item_repo::ItemRow;
use super::{Database, DatabaseError};
use crate::model::{OUTCOME_FILED, OUTCOME_NOT_FOUND};

/// A raw result row.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRow {
    pub id: i64,
    pub item_id: Option<i64>,
    pub batch_id: String,
    pub case_number: String,
    pub sub_identifier: String,
    pub source_ref: String,
    pub outcome: String,
    pub document: Option<String>,
    pub detail: Option<String>,
    pub protocol_date: Option<String>,
    pub operator: String,
    pub mode: String,
    pub host: String,
    pub verified_at: String,
}

impl ResultRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            item_id: row.get("item_id")?,
            batch_id: row.get("batch_id")?,
            case_number: row.get("case_number")?,
            sub_identifier: row.get("sub_identifier")?,
            source_ref: row.get("source_ref")?,
            outcome: row.get("outcome")?,
            document: row.get("document")?,
            detail: row.get("detail")?,
            protocol_date: row.get("protocol_date")?,
            operator: row.get("operator")?,
            mode: row.get("mode")?,
            host: row.get("host")?,
            verified_at: row.get("verified_at")?,
        })
    }
}

/// Values for a result row. Mirrors what the worker writes.
#[derive(Debug, Clone, Default)]
pub struct NewResult {
    pub item_id: Option<i64>,
    pub batch_id: String,
    pub case_number: String,
    pub sub_identifier: String,
    pub source_ref: String,
    pub outcome: String,
    pub document: Option<String>,
    pub detail: Option<String>,
    pub protocol_date: Option<String>,
    pub operator: String,
    pub mode: String,
    pub host: String,
    pub verified_at: String,
}

/// Outcome tallies of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeTally {
    pub filed: i64,
    pub not_found: i64,
}

/// Inserts a result row and returns its id.
pub fn insert(db: &Database, result: &NewResult) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO results (item_id, batch_id, case_number, sub_identifier, source_ref,
             outcome, document, detail, protocol_date, operator, mode, host, verified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                result.item_id,
                result.batch_id,
                result.case_number,
                result.sub_identifier,
                result.source_ref,
                result.outcome,
                result.document,
                result.detail,
                result.protocol_date,
                result.operator,
                result.mode,
                result.host,
                result.verified_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Results of a batch, newest first.
pub fn list_for_batch(db: &Database, batch_id: &str) -> Result<Vec<ResultRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM results WHERE batch_id = ?1 ORDER BY verified_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![batch_id], ResultRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Most recent results across all batches.
pub fn recent(db: &Database, limit: u32) -> Result<Vec<ResultRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM results ORDER BY verified_at DESC, id DESC LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit], ResultRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Results that reference `item_id`.
pub fn list_for_item(db: &Database, item_id: i64) -> Result<Vec<ResultRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM results WHERE item_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![item_id], ResultRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Total number of result rows.
pub fn count_all(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM results", [], |r| r.get(0))?;
        Ok(count as u64)
    })
}

/// Number of results verified at or after `since`.
pub fn count_since(db: &Database, since: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM results WHERE datetime(verified_at) >= datetime(?1)",
            params![since],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    })
}

/// Most recent unreferenced row in the item's batch with the item's exact
/// `source_ref`. Ties go to the highest id.
pub fn find_by_source(db: &Database, item: &ItemRow) -> Result<Option<i64>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id FROM results
             WHERE batch_id = ?1 AND item_id IS NULL AND source_ref = ?2
             ORDER BY verified_at DESC, id DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![item.batch_id, item.source_ref], |r| {
            r.get::<_, i64>(0)
        })?;
        match rows.next() {
            Some(Ok(id)) => Ok(Some(id)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Most recent unreferenced row in the item's batch with the item's case
/// number and sub-identifier. Rows naming another item of the batch by
/// source are left for that item. Never matches an item without a case
/// number.
pub fn find_by_case(db: &Database, item: &ItemRow) -> Result<Option<i64>, DatabaseError> {
    if item.case_number.is_empty() {
        return Ok(None);
    }
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id FROM results
             WHERE batch_id = ?1 AND item_id IS NULL
               AND case_number = ?2 AND sub_identifier = ?3
               AND NOT EXISTS (
                 SELECT 1 FROM items i
                 WHERE i.batch_id = results.batch_id
                   AND i.source_ref = results.source_ref
                   AND i.id <> ?4)
             ORDER BY verified_at DESC, id DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(
            params![item.batch_id, item.case_number, item.sub_identifier, item.id],
            |r| r.get::<_, i64>(0),
        )?;
        match rows.next() {
            Some(Ok(id)) => Ok(Some(id)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Points an unreferenced row at `item_id`. No-op if the row was claimed in
/// the meantime or the item already has a result.
pub fn attach(db: &Database, result_id: i64, item_id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE results SET item_id = ?2
             WHERE id = ?1 AND item_id IS NULL
               AND NOT EXISTS (SELECT 1 FROM results WHERE item_id = ?2)",
            params![result_id, item_id],
        )?;
        Ok(n > 0)
    })
}

/// Inserts a result for `item` copied from the most recent row with the same
/// batch, case number and sub-identifier. Returns `false` when there is no
/// such row, the item has no case number, or the item already has a result.
pub fn synthesize_from_prior(db: &Database, item: &ItemRow) -> Result<bool, DatabaseError> {
    if item.case_number.is_empty() {
        return Ok(false);
    }
    db.with_conn(|conn| {
        let n = conn.execute(
            "INSERT INTO results (item_id, batch_id, case_number, sub_identifier, source_ref,
             outcome, document, detail, protocol_date, operator, mode, host, verified_at)
             SELECT ?1, batch_id, case_number, sub_identifier, ?2,
                    outcome, document, detail, protocol_date, operator, mode, host, verified_at
             FROM results
             WHERE batch_id = ?3 AND case_number = ?4 AND sub_identifier = ?5
               AND NOT EXISTS (SELECT 1 FROM results WHERE item_id = ?1)
             ORDER BY verified_at DESC, id DESC
             LIMIT 1",
            params![
                item.id,
                item.source_ref,
                item.batch_id,
                item.case_number,
                item.sub_identifier
            ],
        )?;
        Ok(n > 0)
    })
}

/// Deletes unreferenced rows superseded by a referenced row for the same
/// batch and source reference, or the same batch, case number and
/// sub-identifier. Returns the number of rows deleted.
pub fn delete_superseded(db: &Database) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "DELETE FROM results
             WHERE item_id IS NULL
               AND EXISTS (
                 SELECT 1 FROM results r
                 WHERE r.item_id IS NOT NULL
                   AND r.batch_id = results.batch_id
                   AND (r.source_ref = results.source_ref
                        OR (results.case_number <> ''
                            AND r.case_number = results.case_number
                            AND r.sub_identifier = results.sub_identifier)))",
            [],
        )?;
        Ok(n)
    })
}

/// Counts filed / not-found outcomes of a batch.
pub fn tally_with(conn: &Connection, batch_id: &str) -> Result<OutcomeTally, DatabaseError> {
    let (filed, not_found) = conn.query_row(
        "SELECT COALESCE(SUM(outcome = ?2), 0), COALESCE(SUM(outcome = ?3), 0)
         FROM results WHERE batch_id = ?1",
        params![batch_id, OUTCOME_FILED, OUTCOME_NOT_FOUND],
        |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)),
    )?;
    Ok(OutcomeTally { filed, not_found })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, source: &str, case: &str, sub: &str) -> ItemRow {
        ItemRow {
            id,
            batch_id: "b1".to_string(),
            source_ref: source.to_string(),
            case_number: case.to_string(),
            sub_identifier: sub.to_string(),
            status: "done".to_string(),
            message: String::new(),
            created_at: "2026-01-01 10:00:00".to_string(),
            updated_at: None,
        }
    }

    fn legacy(source: &str, case: &str, sub: &str, verified_at: &str) -> NewResult {
        NewResult {
            batch_id: "b1".to_string(),
            case_number: case.to_string(),
            sub_identifier: sub.to_string(),
            source_ref: source.to_string(),
            outcome: OUTCOME_FILED.to_string(),
            protocol_date: Some("07/03/2025".to_string()),
            verified_at: verified_at.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_source_match_ignores_case_rows() {
        let db = Database::open_in_memory().unwrap();
        let by_case = insert(&db, &legacy("other.pdf", "C1", "_1_2_", "2026-01-02 00:00:00")).unwrap();
        let by_source = insert(&db, &legacy("a.pdf", "C9", "", "2026-01-01 00:00:00")).unwrap();
        let it = item(1, "a.pdf", "C1", "_1_2_");

        assert_eq!(find_by_source(&db, &it).unwrap(), Some(by_source));
        assert_eq!(find_by_case(&db, &it).unwrap(), Some(by_case));
        assert!(attach(&db, by_source, 1).unwrap());
        // Second attach for the same item is refused.
        assert!(!attach(&db, by_case, 1).unwrap());
    }

    #[test]
    fn test_case_match_takes_latest() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &legacy("x.pdf", "C1", "_1_2_", "2026-01-01 00:00:00")).unwrap();
        let newer = insert(&db, &legacy("y.pdf", "C1", "_1_2_", "2026-01-02 00:00:00")).unwrap();
        let it = item(1, "a.pdf", "C1", "_1_2_");
        assert_eq!(find_by_case(&db, &it).unwrap(), Some(newer));
    }

    #[test]
    fn test_case_match_skips_rows_of_sibling_items() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO batches (id, operator, mode, host, status, item_count, created_at)
                 VALUES ('b1', 'op', 'headless', 'h', 'running', 2, '2026-01-01 00:00:00')",
                [],
            )?;
            conn.execute(
                "INSERT INTO items (id, batch_id, source_ref, case_number, sub_identifier, status, created_at)
                 VALUES (1, 'b1', 'a.pdf', 'C1', '_1_2_', 'done', '2026-01-01 00:00:00'),
                        (2, 'b1', 'b.pdf', 'C1', '_1_2_', 'running', '2026-01-01 00:00:00')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        insert(&db, &legacy("b.pdf", "C1", "_1_2_", "2026-01-01 00:00:00")).unwrap();

        let a = item(1, "a.pdf", "C1", "_1_2_");
        assert_eq!(find_by_source(&db, &a).unwrap(), None);
        assert_eq!(find_by_case(&db, &a).unwrap(), None);
    }

    #[test]
    fn test_empty_case_never_matches_by_case() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &legacy("x.pdf", "", "", "2026-01-01 00:00:00")).unwrap();
        let it = item(1, "a.pdf", "", "");
        assert_eq!(find_by_case(&db, &it).unwrap(), None);
        assert!(!synthesize_from_prior(&db, &it).unwrap());
    }

    #[test]
    fn test_synthesize_copies_latest_prior() {
        let db = Database::open_in_memory().unwrap();
        let prior = insert(&db, &legacy("x.pdf", "C1", "_1_2_", "2026-01-01 00:00:00")).unwrap();
        attach(&db, prior, 7).unwrap();

        let it = item(8, "a.pdf", "C1", "_1_2_");
        assert!(synthesize_from_prior(&db, &it).unwrap());
        assert!(!synthesize_from_prior(&db, &it).unwrap());

        let rows = list_for_item(&db, 8).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_ref, "a.pdf");
        assert_eq!(rows[0].outcome, OUTCOME_FILED);
        assert_eq!(rows[0].protocol_date.as_deref(), Some("07/03/2025"));
    }

    #[test]
    fn test_delete_superseded() {
        let db = Database::open_in_memory().unwrap();
        let keep = insert(&db, &legacy("a.pdf", "C1", "_1_2_", "2026-01-01 00:00:00")).unwrap();
        attach(&db, keep, 1).unwrap();
        insert(&db, &legacy("a.pdf", "", "", "2026-01-01 00:00:00")).unwrap();
        insert(&db, &legacy("z.pdf", "C1", "_1_2_", "2026-01-01 00:00:00")).unwrap();
        let unrelated = insert(&db, &legacy("q.pdf", "C2", "", "2026-01-01 00:00:00")).unwrap();

        assert_eq!(delete_superseded(&db).unwrap(), 2);
        let ids: Vec<i64> = list_for_batch(&db, "b1").unwrap().iter().map(|r| r.id).collect();
        assert!(ids.contains(&keep));
        assert!(ids.contains(&unrelated));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_tally_and_counts() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &legacy("a.pdf", "C1", "", "2026-01-01 00:00:00")).unwrap();
        let mut nf = legacy("b.pdf", "C2", "", "2026-01-03 00:00:00");
        nf.outcome = OUTCOME_NOT_FOUND.to_string();
        insert(&db, &nf).unwrap();

        let tally = db.with_conn(|c| tally_with(c, "b1")).unwrap();
        assert_eq!(tally, OutcomeTally { filed: 1, not_found: 1 });
        assert_eq!(count_all(&db).unwrap(), 2);
        assert_eq!(count_since(&db, "2026-01-02 00:00:00").unwrap(), 1);
        assert_eq!(recent(&db, 1).unwrap()[0].source_ref, "b.pdf");
    }
}
