//! Repairs the item ↔ result correspondence and batch bookkeeping.
//!
//! Every pass is idempotent: running it twice in a row changes nothing the
//! second time. Work that cannot be resolved yet is counted and retried on
//! the next pass.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::timestamp::format_timestamp;
use crate::db::{batch_repo, item_repo, log_repo, result_repo, Database, DatabaseError};

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Unreferenced result rows attached to their item.
    pub attached: usize,
    /// Result rows created from an earlier row for the same case.
    pub synthesized: usize,
    /// `done` items still without a result.
    pub unresolved: usize,
    /// Unreferenced rows removed because a referenced row supersedes them.
    pub deleted: usize,
    /// Batches whose progress counter was raised.
    pub progress_updated: usize,
    /// Batches closed because all of their items are terminal.
    pub settled: usize,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.attached + self.synthesized + self.deleted + self.progress_updated + self.settled > 0
    }
}

#[derive(Clone)]
pub struct Reconciler {
    db: Database,
}

impl Reconciler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn run(&self) -> Result<ReconcileReport, DatabaseError> {
        let mut report = ReconcileReport::default();

        self.link_done_items(&mut report)?;
        report.deleted = result_repo::delete_superseded(&self.db)?;
        report.progress_updated = batch_repo::catch_up_progress(&self.db)?;
        report.settled = self.settle_finished_batches()?;

        if report.changed() {
            info!(
                attached = report.attached,
                synthesized = report.synthesized,
                deleted = report.deleted,
                progress_updated = report.progress_updated,
                settled = report.settled,
                "Reconciliation pass applied changes"
            );
        }
        if report.unresolved > 0 {
            debug!(unresolved = report.unresolved, "Done items still lack a result");
        }

        Ok(report)
    }

    /// Links `done` items to a result. Exact source matches are settled for
    /// every item before any item falls back to its case number, so a row
    /// written for one file is never claimed by a sibling with the same case.
    fn link_done_items(&self, report: &mut ReconcileReport) -> Result<(), DatabaseError> {
        for item in item_repo::done_without_result(&self.db)? {
            if let Some(result_id) = result_repo::find_by_source(&self.db, &item)? {
                if result_repo::attach(&self.db, result_id, item.id)? {
                    report.attached += 1;
                }
            }
        }

        for item in item_repo::done_without_result(&self.db)? {
            if let Some(result_id) = result_repo::find_by_case(&self.db, &item)? {
                if result_repo::attach(&self.db, result_id, item.id)? {
                    report.attached += 1;
                    continue;
                }
            }

            if result_repo::synthesize_from_prior(&self.db, &item)? {
                report.synthesized += 1;
                continue;
            }

            report.unresolved += 1;
        }
        Ok(())
    }

    /// Closes non-terminal batches whose items have all reached a terminal
    /// state, the same bookkeeping the worker does when it exits normally.
    fn settle_finished_batches(&self) -> Result<usize, DatabaseError> {
        let mut settled = 0;
        for batch_id in batch_repo::finished_unsettled(&self.db)? {
            let now = format_timestamp(Utc::now());
            let closed = self.db.with_transaction(|conn| {
                let tally = result_repo::tally_with(conn, &batch_id)?;
                let closed =
                    batch_repo::finalize_with(conn, &batch_id, &now, tally.filed, tally.not_found)?;
                if closed {
                    let message = format!(
                        "Batch settled: all items finished ({} filed, {} not found)",
                        tally.filed, tally.not_found
                    );
                    log_repo::append_with(
                        conn,
                        &log_repo::NewLogEntry::orchestrator(&now, "INFO", &message)
                            .batch(&batch_id),
                    )?;
                }
                Ok(closed)
            })?;

            if closed {
                settled += 1;
            } else {
                warn!(batch_id = %batch_id, "Batch changed state before it could be settled");
            }
        }
        Ok(settled)
    }
}
