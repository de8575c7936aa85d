//! Entry point for the API layer.
//!
//! `Orchestrator` owns the store handle and the engine components and
//! exposes the operations an operator surface needs: batch creation,
//! read views, administrative repairs and live subscriptions.

use std::sync::Arc;

use chrono::Utc;
use secrecy::SecretString;
use serde::Serialize;
use tracing::{info, warn};

use crate::broadcast::snapshot::{self, BATCH_LIST_LIMIT};
use crate::broadcast::{BatchView, HubSettings, LiveHub, ResultView, Subscription, Summary};
use crate::config::OrchestratorConfig;
use crate::db::batch_repo::{self, BatchRow, NewBatch};
use crate::db::item_repo::{self, ItemRow, NewItem};
use crate::db::log_repo::{self, LogRow, NewLogEntry};
use crate::db::timestamp::format_timestamp;
use crate::db::{config_repo, credential_repo, result_repo, Database};
use crate::error::{Result, VigilError};
use crate::maintenance::{Maintenance, ReconcileReport};
use crate::model::{parse_source_ref, ExecutionMode};
use crate::periodic::{PeriodicRunner, RunnerHandle};
use crate::worker::{
    Launcher, ProcessEnvironment, ProcessGuard, Scheduler, SchedulerDecision,
    SystemProcessEnvironment, WorkerProcess,
};

/// Settings key holding the default operator name.
pub const OPERATOR_SETTING: &str = "operator";

/// Returned by [`Orchestrator::create_batch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReceipt {
    pub batch_id: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizeReport {
    pub batch_id: String,
    pub total_filed: i64,
    pub total_not_found: i64,
    /// `false` when the batch was already terminal and only its tallies
    /// were rewritten.
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequeueReport {
    pub batch_id: String,
    pub requeued: usize,
    pub reopened: bool,
}

pub struct Orchestrator {
    db: Database,
    config: OrchestratorConfig,
    env: Arc<dyn ProcessEnvironment>,
    scheduler: Scheduler,
    guard: ProcessGuard,
    maintenance: Maintenance,
    hub: LiveHub,
}

impl Orchestrator {
    /// Opens the configured store and uses the operating system's process
    /// table.
    pub fn open(config: OrchestratorConfig) -> Result<Self> {
        let path = config.resolved_database_path().ok_or_else(|| {
            VigilError::InvalidRequest("no database path configured and no home directory".into())
        })?;
        let db = Database::open(&path)?;
        Ok(Self::with_environment(
            db,
            config,
            Arc::new(SystemProcessEnvironment::new()),
        ))
    }

    pub fn with_environment(
        db: Database,
        config: OrchestratorConfig,
        env: Arc<dyn ProcessEnvironment>,
    ) -> Self {
        let launcher = Launcher::new(env.clone(), config.worker.clone());
        let scheduler = Scheduler::new(db.clone(), env.clone(), launcher);
        let guard = ProcessGuard::new(env.clone(), config.worker.signature.clone());
        let maintenance = Maintenance::from_config(db.clone(), &config);
        let hub = LiveHub::new(
            db.clone(),
            maintenance.clone(),
            HubSettings {
                interval: config.notifier_interval(),
                buffer: config.subscriber_buffer,
                recent_limit: config.recent_results_limit,
            },
        );

        Self {
            db,
            config,
            env,
            scheduler,
            guard,
            maintenance,
            hub,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn hub(&self) -> &LiveHub {
        &self.hub
    }

    /// Starts the scheduler, the process guard and, unless disabled, the
    /// background maintenance loop.
    pub fn start_background(&self) -> std::io::Result<RunnerHandle> {
        let mut runner = PeriodicRunner::new()
            .with_task(Arc::new(self.scheduler.clone()), self.config.scheduler_interval())
            .with_task(Arc::new(self.guard.clone()), self.config.guard_interval());
        if let Some(period) = self.config.maintenance_interval() {
            runner = runner.with_task(Arc::new(self.maintenance.clone()), period);
        }
        let handle = runner.run_immediately(true).start("vigil-engine")?;
        info!("Background engine started");
        Ok(handle)
    }

    /// Creates a `queued` batch with one `pending` item per non-blank source.
    pub fn create_batch(
        &self,
        sources: &[String],
        operator: Option<&str>,
        mode: ExecutionMode,
    ) -> Result<BatchReceipt> {
        let items: Vec<NewItem> = sources
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|source| {
                let ids = parse_source_ref(source);
                NewItem {
                    source_ref: source.to_string(),
                    case_number: ids.case_number,
                    sub_identifier: ids.sub_identifier,
                }
            })
            .collect();

        if items.is_empty() {
            return Err(VigilError::InvalidRequest(
                "no non-blank sources in request".into(),
            ));
        }

        let operator = match operator.map(str::trim).filter(|o| !o.is_empty()) {
            Some(o) => o.to_string(),
            None => config_repo::get(&self.db, OPERATOR_SETTING)?.unwrap_or_default(),
        };

        let now = format_timestamp(Utc::now());
        let batch = NewBatch {
            id: uuid::Uuid::new_v4().simple().to_string(),
            operator,
            mode,
            host: host_name(),
            item_count: items.len() as i64,
            created_at: now.clone(),
        };

        self.db.with_transaction(|conn| {
            batch_repo::insert_with(conn, &batch)?;
            item_repo::insert_many_with(conn, &batch.id, &items, &now)
        })?;

        info!(batch_id = %batch.id, count = items.len(), mode = %mode, "Batch created");

        Ok(BatchReceipt {
            batch_id: batch.id,
            count: items.len(),
        })
    }

    pub fn list_batches(&self) -> Result<Vec<BatchView>> {
        Ok(snapshot::batch_views(&self.db, BATCH_LIST_LIMIT)?)
    }

    pub fn batch(&self, batch_id: &str) -> Result<BatchRow> {
        batch_repo::find_by_id(&self.db, batch_id)?
            .ok_or_else(|| VigilError::BatchNotFound(batch_id.to_string()))
    }

    pub fn batch_items(&self, batch_id: &str) -> Result<Vec<ItemRow>> {
        self.batch(batch_id)?;
        Ok(item_repo::list_for_batch(&self.db, batch_id)?)
    }

    pub fn batch_logs(&self, batch_id: &str, limit: u32) -> Result<Vec<LogRow>> {
        self.batch(batch_id)?;
        Ok(log_repo::list_for_batch(&self.db, batch_id, limit)?)
    }

    pub fn batch_results(&self, batch_id: &str) -> Result<Vec<ResultView>> {
        self.batch(batch_id)?;
        Ok(snapshot::batch_results(&self.db, batch_id)?)
    }

    pub fn recent_results(&self, limit: u32) -> Result<Vec<ResultView>> {
        Ok(snapshot::recent_results(&self.db, limit)?)
    }

    pub fn summary(&self) -> Result<Summary> {
        Ok(snapshot::build_summary(&self.db)?)
    }

    /// Closes a batch as `done` with tallies taken from its results. A batch
    /// that is already terminal keeps its status; its tallies are refreshed.
    pub fn force_finalize(&self, batch_id: &str) -> Result<FinalizeReport> {
        self.batch(batch_id)?;
        let now = format_timestamp(Utc::now());

        let report = self.db.with_transaction(|conn| {
            let tally = result_repo::tally_with(conn, batch_id)?;
            let closed =
                batch_repo::finalize_with(conn, batch_id, &now, tally.filed, tally.not_found)?;
            if !closed {
                batch_repo::set_tallies_with(conn, batch_id, tally.filed, tally.not_found)?;
            }
            let message = format!(
                "Batch finalized by operator ({} filed, {} not found)",
                tally.filed, tally.not_found
            );
            log_repo::append_with(
                conn,
                &NewLogEntry::orchestrator(&now, "INFO", &message).batch(batch_id),
            )?;
            Ok(FinalizeReport {
                batch_id: batch_id.to_string(),
                total_filed: tally.filed,
                total_not_found: tally.not_found,
                closed,
            })
        })?;

        info!(batch_id, closed = report.closed, "Batch finalized");
        Ok(report)
    }

    /// Moves failed items back to `pending`. A terminal batch with failed
    /// items is reopened so the scheduler picks it up again.
    pub fn requeue_failed(&self, batch_id: &str) -> Result<RequeueReport> {
        self.batch(batch_id)?;
        let now = format_timestamp(Utc::now());

        let report = self.db.with_transaction(|conn| {
            let requeued = item_repo::requeue_failed_with(conn, batch_id, &now)?;
            let reopened = requeued > 0 && batch_repo::reopen_with(conn, batch_id)?;
            if requeued > 0 {
                let message = format!("{requeued} failed item(s) requeued by operator");
                log_repo::append_with(
                    conn,
                    &NewLogEntry::orchestrator(&now, "INFO", &message).batch(batch_id),
                )?;
            }
            Ok(RequeueReport {
                batch_id: batch_id.to_string(),
                requeued,
                reopened,
            })
        })?;

        info!(batch_id, requeued = report.requeued, reopened = report.reopened, "Failed items requeued");
        Ok(report)
    }

    pub fn reconcile_now(&self) -> Result<ReconcileReport> {
        Ok(self.maintenance.reconciler().run()?)
    }

    /// One scheduler tick, on demand.
    pub fn launch_now(&self) -> Result<SchedulerDecision> {
        self.scheduler.tick()
    }

    pub fn list_workers(&self) -> Result<Vec<WorkerProcess>> {
        Ok(self.env.list_workers(&self.config.worker.signature)?)
    }

    pub fn kill_worker(&self, pid: u32) -> Result<()> {
        let known = self
            .list_workers()?
            .into_iter()
            .any(|w| w.pid == pid);
        if !known {
            warn!(pid, "Refusing to terminate a process that is not a worker");
            return Err(VigilError::InvalidRequest(format!(
                "process {} is not a running worker",
                pid
            )));
        }
        self.env.kill(pid)?;
        info!(pid, "Worker terminated");
        Ok(())
    }

    pub fn subscribe(&self, batch_filter: Option<String>) -> Result<Subscription> {
        if let Some(batch_id) = &batch_filter {
            self.batch(batch_id)?;
        }
        self.hub.subscribe(batch_filter)
    }

    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        Ok(config_repo::get(&self.db, key)?)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(VigilError::InvalidRequest("setting key must not be empty".into()));
        }
        Ok(config_repo::set(&self.db, key, value)?)
    }

    pub fn settings(&self) -> Result<Vec<(String, String)>> {
        Ok(config_repo::all(&self.db)?)
    }

    pub fn save_credential(&self, username: &str, secret: &SecretString) -> Result<()> {
        if username.trim().is_empty() {
            return Err(VigilError::InvalidRequest("username must not be empty".into()));
        }
        Ok(credential_repo::save(&self.db, username, secret)?)
    }

    pub fn credential_users(&self) -> Result<Vec<String>> {
        Ok(credential_repo::usernames(&self.db)?)
    }

    pub fn credential_secret(&self, username: &str) -> Result<Option<SecretString>> {
        Ok(credential_repo::secret(&self.db, username)?)
    }
}

fn host_name() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_default()
}
