//! Test harness for isolated test execution.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use vigil::config::{OrchestratorConfig, WorkerCommand};
use vigil::worker::{is_worker_command, LaunchRequest, ProcessEnvironment, WorkerProcess};
use vigil::{Database, ExecutionMode, Orchestrator, ProcessError};

/// A process table the test controls. Spawned workers show up in the
/// listing until killed.
pub struct FakeProcessEnvironment {
    processes: Mutex<Vec<WorkerProcess>>,
    launches: Mutex<Vec<LaunchRequest>>,
    killed: Mutex<Vec<u32>>,
    failing_programs: Mutex<Vec<String>>,
    list_fails: AtomicBool,
    next_pid: AtomicU32,
}

impl FakeProcessEnvironment {
    pub fn new() -> Self {
        Self {
            processes: Mutex::new(Vec::new()),
            launches: Mutex::new(Vec::new()),
            killed: Mutex::new(Vec::new()),
            failing_programs: Mutex::new(Vec::new()),
            list_fails: AtomicBool::new(false),
            next_pid: AtomicU32::new(1000),
        }
    }

    /// Adds a process as if someone started a worker by hand.
    pub fn add_process(&self, pid: u32, command_line: &str) {
        self.processes.lock().unwrap().push(WorkerProcess {
            pid,
            command_line: command_line.to_string(),
        });
    }

    /// Simulates the worker exiting on its own.
    pub fn exit_all(&self) {
        self.processes.lock().unwrap().clear();
    }

    pub fn fail_program(&self, program: &str) {
        self.failing_programs.lock().unwrap().push(program.to_string());
    }

    pub fn set_list_fails(&self, fails: bool) {
        self.list_fails.store(fails, Ordering::SeqCst);
    }

    pub fn pids(&self) -> Vec<u32> {
        self.processes.lock().unwrap().iter().map(|p| p.pid).collect()
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.launches.lock().unwrap().clone()
    }

    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().unwrap().clone()
    }
}

impl ProcessEnvironment for FakeProcessEnvironment {
    fn list_workers(&self, signature: &str) -> Result<Vec<WorkerProcess>, ProcessError> {
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(ProcessError::ListFailed("process table unavailable".into()));
        }
        Ok(self
            .processes
            .lock()
            .unwrap()
            .iter()
            .filter(|p| is_worker_command(&p.command_line, signature))
            .cloned()
            .collect())
    }

    fn spawn(&self, command: &WorkerCommand, request: &LaunchRequest) -> Result<u32, ProcessError> {
        if self
            .failing_programs
            .lock()
            .unwrap()
            .contains(&command.program)
        {
            return Err(ProcessError::SpawnFailed {
                program: command.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            });
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let mut args = command.args.clone();
        args.push(request.script.clone());
        self.add_process(
            pid,
            &format!("{} {} --batch {}", command.program, args.join(" "), request.batch_id),
        );
        self.launches.lock().unwrap().push(request.clone());
        Ok(pid)
    }

    fn kill(&self, pid: u32) -> Result<(), ProcessError> {
        self.processes.lock().unwrap().retain(|p| p.pid != pid);
        self.killed.lock().unwrap().push(pid);
        Ok(())
    }
}

/// Test harness providing an isolated store and orchestrator.
pub struct TestHarness {
    temp_dir: TempDir,
    pub env: Arc<FakeProcessEnvironment>,
    pub orchestrator: Orchestrator,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    pub fn with_config(mut config: OrchestratorConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("vigil.db");
        config.database_path = Some(db_path.clone());

        let db = Database::open(&db_path).expect("Failed to open database");
        let env = Arc::new(FakeProcessEnvironment::new());
        let orchestrator = Orchestrator::with_environment(db, config, env.clone());

        Self {
            temp_dir,
            env,
            orchestrator,
        }
    }

    pub fn db(&self) -> &Database {
        self.orchestrator.database()
    }

    /// Creates a headless batch and returns its id.
    pub fn enqueue(&self, sources: &[&str]) -> String {
        let sources: Vec<String> = sources.iter().map(|s| s.to_string()).collect();
        self.orchestrator
            .create_batch(&sources, Some("tester"), ExecutionMode::Headless)
            .expect("Failed to create batch")
            .batch_id
    }

    pub fn item_ids(&self, batch_id: &str) -> Vec<i64> {
        self.orchestrator
            .batch_items(batch_id)
            .expect("Failed to list items")
            .iter()
            .map(|i| i.id)
            .collect()
    }

    pub fn batch_status(&self, batch_id: &str) -> String {
        self.orchestrator.batch(batch_id).expect("batch exists").status
    }

    pub fn item_statuses(&self, batch_id: &str) -> Vec<String> {
        self.orchestrator
            .batch_items(batch_id)
            .expect("Failed to list items")
            .into_iter()
            .map(|i| i.status)
            .collect()
    }
}
