//! Launches the worker for the oldest queued batch when nothing else runs.
//!
//! Mutual exclusion is best effort: a live worker process or an active
//! batch row both block a launch, and the process guard cleans up whatever
//! slips through.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::batch_repo::{self, BatchRow};
use crate::db::log_repo::{self, NewLogEntry};
use crate::db::timestamp::format_timestamp;
use crate::db::Database;
use crate::error::Result;
use crate::model::{BatchStatus, ExecutionMode};
use crate::worker::launch::{LaunchAttemptError, LaunchRequest, Launcher};
use crate::worker::process::ProcessEnvironment;

/// What a scheduler tick did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum SchedulerDecision {
    /// A worker process is already running.
    WorkerAlive { pids: Vec<u32> },
    /// A batch already holds the worker slot.
    LaunchInFlight { batch_id: String, status: BatchStatus },
    /// Nothing is queued.
    Idle,
    /// The process table could not be read; launching blind is not safe.
    ProcessCheckFailed { reason: String },
    /// Another actor moved the batch first.
    Raced { batch_id: String },
    Launched {
        batch_id: String,
        worker_id: String,
        pid: u32,
        program: String,
    },
    /// Every launch strategy failed; the batch is back in `queued`.
    LaunchFailed {
        batch_id: String,
        errors: Vec<LaunchAttemptError>,
    },
}

#[derive(Clone)]
pub struct Scheduler {
    db: Database,
    env: Arc<dyn ProcessEnvironment>,
    launcher: Launcher,
}

impl Scheduler {
    pub fn new(db: Database, env: Arc<dyn ProcessEnvironment>, launcher: Launcher) -> Self {
        Self { db, env, launcher }
    }

    fn signature(&self) -> &str {
        &self.launcher.worker_config().signature
    }

    /// Checks whether a worker process is alive. `Err` carries the reason the
    /// process table could not be read.
    fn live_workers(&self) -> std::result::Result<Vec<u32>, String> {
        self.env
            .list_workers(self.signature())
            .map(|procs| procs.into_iter().map(|p| p.pid).collect())
            .map_err(|e| e.to_string())
    }

    pub fn tick(&self) -> Result<SchedulerDecision> {
        match self.live_workers() {
            Ok(pids) if !pids.is_empty() => {
                debug!(?pids, "Worker alive, not launching");
                return Ok(SchedulerDecision::WorkerAlive { pids });
            }
            Ok(_) => {}
            Err(reason) => {
                warn!(%reason, "Could not list processes, skipping launch");
                return Ok(SchedulerDecision::ProcessCheckFailed { reason });
            }
        }

        if let Some(active) = batch_repo::find_active(&self.db)? {
            let status = active.status()?;
            debug!(batch_id = %active.id, %status, "Batch already holds the worker slot");
            return Ok(SchedulerDecision::LaunchInFlight {
                batch_id: active.id,
                status,
            });
        }

        match batch_repo::oldest_queued(&self.db)? {
            Some(batch) => self.launch(&batch),
            None => Ok(SchedulerDecision::Idle),
        }
    }

    fn launch(&self, batch: &BatchRow) -> Result<SchedulerDecision> {
        // Pre-flight: a worker may have appeared since the tick started.
        match self.live_workers() {
            Ok(pids) if !pids.is_empty() => return Ok(SchedulerDecision::WorkerAlive { pids }),
            Ok(_) => {}
            Err(reason) => return Ok(SchedulerDecision::ProcessCheckFailed { reason }),
        }

        let now = format_timestamp(Utc::now());
        if !batch_repo::mark_starting(&self.db, &batch.id, &now)? {
            info!(batch_id = %batch.id, "Batch left the queue before launch");
            return Ok(SchedulerDecision::Raced {
                batch_id: batch.id.clone(),
            });
        }

        let mode = batch.mode.parse::<ExecutionMode>().unwrap_or_else(|other| {
            warn!(batch_id = %batch.id, mode = %other, "Unknown mode, launching headless");
            ExecutionMode::Headless
        });
        let request = LaunchRequest::new(&batch.id, mode, self.launcher.worker_config())
            .with_database(self.db.path().map(|p| p.to_path_buf()));

        match self.launcher.launch(&request) {
            Ok(spawned) => {
                let message = format!(
                    "Worker {} launched with {} (pid {})",
                    spawned.worker_id, spawned.program, spawned.pid
                );
                log_repo::append(
                    &self.db,
                    &NewLogEntry::orchestrator(&now, "INFO", &message).batch(&batch.id),
                )?;
                Ok(SchedulerDecision::Launched {
                    batch_id: batch.id.clone(),
                    worker_id: spawned.worker_id,
                    pid: spawned.pid,
                    program: spawned.program,
                })
            }
            Err(errors) => {
                batch_repo::revert_to_queued(&self.db, &batch.id)?;
                let detail = errors
                    .iter()
                    .map(|e| format!("{}: {}", e.program, e.reason))
                    .collect::<Vec<_>>()
                    .join("; ");
                log_repo::append(
                    &self.db,
                    &NewLogEntry::orchestrator(&now, "ERROR", "Failed to launch worker")
                        .batch(&batch.id)
                        .detail(&detail),
                )?;
                warn!(batch_id = %batch.id, %detail, "All launch strategies failed");
                Ok(SchedulerDecision::LaunchFailed {
                    batch_id: batch.id.clone(),
                    errors,
                })
            }
        }
    }
}
