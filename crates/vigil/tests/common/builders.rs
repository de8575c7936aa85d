//! Writers that stand in for the external worker.
//!
//! The worker shares the store with the engine; these helpers write the
//! same rows it would, with timestamps the test chooses.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use rusqlite::params;

use vigil::db::batch_repo;
use vigil::db::item_repo::ItemRow;
use vigil::db::log_repo::{self, NewLogEntry};
use vigil::db::result_repo::{self, NewResult};
use vigil::db::timestamp::format_timestamp;
use vigil::Database;

/// Store timestamp `secs` seconds in the past.
pub fn ago(secs: i64) -> String {
    format_timestamp(Utc::now() - Duration::seconds(secs))
}

pub fn now() -> String {
    ago(0)
}

/// Moves a batch to `status` and stamps `started_at`.
pub fn set_batch_status(db: &Database, batch_id: &str, status: &str, started_at: &str) {
    db.with_conn(|c| {
        c.execute(
            "UPDATE batches SET status = ?2, started_at = ?3 WHERE id = ?1",
            params![batch_id, status, started_at],
        )?;
        Ok(())
    })
    .unwrap();
}

/// Worker picked up the batch: `running` since `at`.
pub fn start_batch(db: &Database, batch_id: &str, at: &str) {
    set_batch_status(db, batch_id, "running", at);
}

pub fn set_item_status(db: &Database, item_id: i64, status: &str, updated_at: &str) {
    db.with_conn(|c| {
        c.execute(
            "UPDATE items SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![item_id, status, updated_at],
        )?;
        Ok(())
    })
    .unwrap();
}

pub fn heartbeat(db: &Database, batch_id: &str, at: &str) {
    batch_repo::touch_heartbeat(db, batch_id, at).unwrap();
}

pub fn worker_log(db: &Database, batch_id: &str, at: &str, message: &str) {
    log_repo::append(
        db,
        &NewLogEntry {
            timestamp: at,
            level: "INFO",
            message,
            detail: None,
            batch_id: Some(batch_id),
            worker_id: Some("worker-1"),
        },
    )
    .unwrap();
}

/// Builder for result rows.
pub struct ResultBuilder {
    row: NewResult,
}

impl ResultBuilder {
    /// A result keyed to `item`, as current workers write it.
    pub fn for_item(item: &ItemRow) -> Self {
        Self {
            row: NewResult {
                item_id: Some(item.id),
                batch_id: item.batch_id.clone(),
                case_number: item.case_number.clone(),
                sub_identifier: item.sub_identifier.clone(),
                source_ref: item.source_ref.clone(),
                outcome: vigil::model::OUTCOME_FILED.to_string(),
                verified_at: now(),
                ..Default::default()
            },
        }
    }

    /// Drops the item reference, as workers did before results were keyed.
    pub fn legacy(mut self) -> Self {
        self.row.item_id = None;
        self
    }

    pub fn not_found(mut self) -> Self {
        self.row.outcome = vigil::model::OUTCOME_NOT_FOUND.to_string();
        self
    }

    pub fn source(mut self, source: &str) -> Self {
        self.row.source_ref = source.to_string();
        self
    }

    pub fn verified_at(mut self, at: &str) -> Self {
        self.row.verified_at = at.to_string();
        self
    }

    pub fn protocol_date(mut self, date: &str) -> Self {
        self.row.protocol_date = Some(date.to_string());
        self
    }

    pub fn insert(self, db: &Database) -> i64 {
        result_repo::insert(db, &self.row).unwrap()
    }
}

/// Every result row: (item_id, source_ref, outcome).
pub fn all_results(db: &Database) -> Vec<(Option<i64>, String, String)> {
    db.with_conn(|c| {
        let mut stmt =
            c.prepare("SELECT item_id, source_ref, outcome FROM results ORDER BY id")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
    .unwrap()
}
