//! Recovers work left behind by a worker that hung or died.
//!
//! Three checks run on every pass, in this order:
//! - batch liveness: a `running` batch with no heartbeat, worker log or
//!   start within the liveness timeout is failed as a whole;
//! - stuck items: `running` longer than the stuck grace without heavy-work
//!   evidence go back to `pending` and their batch back to `queued`;
//! - stalled launches: a batch left in `starting` longer than the launch
//!   grace returns to `queued`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::heavy_work::HeavyWorkPredicate;
use crate::db::timestamp::{format_timestamp, parse_optional, parse_timestamp};
use crate::db::{batch_repo, item_repo, log_repo, Database, DatabaseError};
use crate::model::{BatchStatus, ItemStatus};

/// Thresholds the watchdog applies.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogThresholds {
    pub stuck_grace: chrono::Duration,
    pub liveness_timeout: chrono::Duration,
    pub launch_grace: chrono::Duration,
}

impl Default for WatchdogThresholds {
    fn default() -> Self {
        Self {
            stuck_grace: chrono::Duration::seconds(60),
            liveness_timeout: chrono::Duration::seconds(900),
            launch_grace: chrono::Duration::seconds(120),
        }
    }
}

/// What one watchdog pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WatchdogReport {
    /// Items returned to `pending`.
    pub items_reset: Vec<i64>,
    /// Stuck items left alone because the worker reported heavy work.
    pub items_exempted: Vec<i64>,
    /// Batches moved back to `queued` after a stuck item.
    pub batches_requeued: Vec<String>,
    /// Batches failed for lack of activity.
    pub batches_timed_out: Vec<String>,
    /// Batches returned to `queued` after a launch never took off.
    pub launches_reverted: Vec<String>,
}

impl WatchdogReport {
    pub fn changed(&self) -> bool {
        !(self.items_reset.is_empty()
            && self.batches_requeued.is_empty()
            && self.batches_timed_out.is_empty()
            && self.launches_reverted.is_empty())
    }
}

#[derive(Clone)]
pub struct Watchdog {
    db: Database,
    heavy_work: Arc<dyn HeavyWorkPredicate>,
    thresholds: WatchdogThresholds,
}

impl Watchdog {
    pub fn new(
        db: Database,
        heavy_work: Arc<dyn HeavyWorkPredicate>,
        thresholds: WatchdogThresholds,
    ) -> Self {
        Self {
            db,
            heavy_work,
            thresholds,
        }
    }

    pub fn run(&self) -> Result<WatchdogReport, DatabaseError> {
        self.run_at(Utc::now())
    }

    /// Runs every check as if the current time were `now`.
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<WatchdogReport, DatabaseError> {
        let mut report = WatchdogReport::default();
        self.expire_silent_batches(now, &mut report)?;
        self.recover_stuck_items(now, &mut report)?;
        self.revert_stalled_launches(now, &mut report)?;

        if report.changed() {
            info!(
                items_reset = report.items_reset.len(),
                batches_requeued = report.batches_requeued.len(),
                batches_timed_out = report.batches_timed_out.len(),
                launches_reverted = report.launches_reverted.len(),
                "Watchdog recovered work"
            );
        }
        Ok(report)
    }

    fn recover_stuck_items(
        &self,
        now: DateTime<Utc>,
        report: &mut WatchdogReport,
    ) -> Result<(), DatabaseError> {
        let stamp = format_timestamp(now);

        for item in item_repo::list_by_status(&self.db, ItemStatus::Running)? {
            let touched = item.last_touched();
            let Some(touched_at) = parse_timestamp(touched) else {
                warn!(item_id = item.id, value = touched, "Skipping item with unreadable timestamp");
                continue;
            };
            if now - touched_at <= self.thresholds.stuck_grace {
                continue;
            }

            let messages = log_repo::messages_since(&self.db, &item.batch_id, touched)?;
            if self.heavy_work.is_heavy(&messages) {
                report.items_exempted.push(item.id);
                continue;
            }

            let idle = (now - touched_at).num_seconds();
            let message = format!(
                "Watchdog: no progress for {}s, returned to queue for another attempt",
                idle
            );
            let (reset, requeued) = self.db.with_transaction(|conn| {
                let reset = item_repo::reset_to_pending_with(conn, item.id, &message, &stamp)?;
                if !reset {
                    return Ok((false, false));
                }
                let requeued = batch_repo::requeue_active_with(conn, &item.batch_id)?;
                let log_message = format!("Item {} stuck for {}s, reset to pending", item.id, idle);
                log_repo::append_with(
                    conn,
                    &log_repo::NewLogEntry::orchestrator(&stamp, "WARNING", &log_message)
                        .batch(&item.batch_id)
                        .detail(&item.source_ref),
                )?;
                Ok((true, requeued))
            })?;

            if reset {
                warn!(item_id = item.id, batch_id = %item.batch_id, idle_secs = idle, "Reset stuck item");
                report.items_reset.push(item.id);
            }
            if requeued && !report.batches_requeued.contains(&item.batch_id) {
                report.batches_requeued.push(item.batch_id.clone());
            }
        }
        Ok(())
    }

    fn expire_silent_batches(
        &self,
        now: DateTime<Utc>,
        report: &mut WatchdogReport,
    ) -> Result<(), DatabaseError> {
        let stamp = format_timestamp(now);

        for batch in batch_repo::list_by_status(&self.db, &[BatchStatus::Running])? {
            if batch.completed_at.is_some() {
                continue;
            }
            let last_log = log_repo::last_worker_activity(&self.db, &batch.id)?;
            let latest = [
                parse_optional(batch.heartbeat_at.as_deref()),
                parse_optional(last_log.as_deref()),
                parse_optional(batch.started_at.as_deref()),
            ]
            .into_iter()
            .flatten()
            .max();

            // A running batch with no timestamps at all cannot be judged.
            let Some(latest) = latest else {
                continue;
            };
            if now - latest <= self.thresholds.liveness_timeout {
                continue;
            }

            let silent = (now - latest).num_seconds();
            let item_message = format!("Batch timed out after {}s without worker activity", silent);
            let failed = self.db.with_transaction(|conn| {
                if !batch_repo::force_error_with(conn, &batch.id, &stamp)? {
                    return Ok(None);
                }
                let failed =
                    item_repo::fail_non_terminal_with(conn, &batch.id, &item_message, &stamp)?;
                let log_message = format!(
                    "Batch failed: no worker activity for {}s, {} unfinished items failed",
                    silent, failed
                );
                log_repo::append_with(
                    conn,
                    &log_repo::NewLogEntry::orchestrator(&stamp, "ERROR", &log_message)
                        .batch(&batch.id),
                )?;
                Ok(Some(failed))
            })?;

            if let Some(failed) = failed {
                warn!(batch_id = %batch.id, silent_secs = silent, items_failed = failed, "Batch timed out");
                report.batches_timed_out.push(batch.id);
            }
        }
        Ok(())
    }

    fn revert_stalled_launches(
        &self,
        now: DateTime<Utc>,
        report: &mut WatchdogReport,
    ) -> Result<(), DatabaseError> {
        let stamp = format_timestamp(now);

        for batch in batch_repo::list_by_status(&self.db, &[BatchStatus::Starting])? {
            let Some(started_at) = parse_optional(batch.started_at.as_deref()) else {
                continue;
            };
            if now - started_at <= self.thresholds.launch_grace {
                continue;
            }
            if !batch_repo::revert_to_queued(&self.db, &batch.id)? {
                continue;
            }
            let message = format!(
                "Worker did not report within {}s of launch, batch returned to queue",
                (now - started_at).num_seconds()
            );
            log_repo::append(
                &self.db,
                &log_repo::NewLogEntry::orchestrator(&stamp, "WARNING", &message).batch(&batch.id),
            )?;
            warn!(batch_id = %batch.id, "Reverted stalled launch");
            report.launches_reverted.push(batch.id);
        }
        Ok(())
    }
}
