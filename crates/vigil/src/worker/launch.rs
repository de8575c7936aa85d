//! Starting the worker for a batch.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::model::ExecutionMode;
use crate::worker::process::ProcessEnvironment;

/// Everything a worker instance is started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub batch_id: String,
    /// Fresh per launch, exported as `WORKER_ID`.
    pub worker_id: String,
    pub mode: ExecutionMode,
    pub script: String,
    pub working_dir: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
}

impl LaunchRequest {
    pub fn new(batch_id: &str, mode: ExecutionMode, worker: &WorkerConfig) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            worker_id: new_worker_id(),
            mode,
            script: worker.script.clone(),
            working_dir: worker.working_dir.clone(),
            database_path: None,
        }
    }

    pub fn with_database(mut self, path: Option<PathBuf>) -> Self {
        self.database_path = path;
        self
    }
}

pub fn new_worker_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A worker that was started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpawnedWorker {
    pub pid: u32,
    pub program: String,
    pub worker_id: String,
}

/// One failed launch strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchAttemptError {
    pub program: String,
    pub reason: String,
}

/// Tries each configured launch command in order until one spawns.
#[derive(Clone)]
pub struct Launcher {
    env: Arc<dyn ProcessEnvironment>,
    worker: WorkerConfig,
}

impl Launcher {
    pub fn new(env: Arc<dyn ProcessEnvironment>, worker: WorkerConfig) -> Self {
        Self { env, worker }
    }

    pub fn worker_config(&self) -> &WorkerConfig {
        &self.worker
    }

    pub fn launch(&self, request: &LaunchRequest) -> Result<SpawnedWorker, Vec<LaunchAttemptError>> {
        let mut errors = Vec::new();

        for command in &self.worker.commands {
            match self.env.spawn(command, request) {
                Ok(pid) => {
                    info!(
                        batch_id = %request.batch_id,
                        worker_id = %request.worker_id,
                        program = %command.program,
                        pid,
                        "Worker launched"
                    );
                    return Ok(SpawnedWorker {
                        pid,
                        program: command.program.clone(),
                        worker_id: request.worker_id.clone(),
                    });
                }
                Err(e) => {
                    warn!(program = %command.program, error = %e, "Launch strategy failed");
                    errors.push(LaunchAttemptError {
                        program: command.program.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(errors)
    }
}
