use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Orchestrator settings. Every field has a default, so `{}` is a valid
/// configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Store location. Defaults to `~/.vigil/data/vigil.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_scheduler_interval_secs")]
    pub scheduler_interval_secs: u64,
    #[serde(default = "default_guard_interval_secs")]
    pub guard_interval_secs: u64,
    #[serde(default = "default_notifier_interval_ms")]
    pub notifier_interval_ms: u64,
    /// Background reconcile + watchdog pass; `0` leaves maintenance to the
    /// notifier ticks only.
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
    #[serde(default = "default_stuck_grace_secs")]
    pub stuck_grace_secs: u64,
    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,
    #[serde(default = "default_launch_grace_secs")]
    pub launch_grace_secs: u64,
    #[serde(default = "default_recent_results_limit")]
    pub recent_results_limit: u32,
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    #[serde(default)]
    pub heavy_work: HeavyWorkConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

fn default_scheduler_interval_secs() -> u64 {
    8
}

fn default_guard_interval_secs() -> u64 {
    5
}

fn default_notifier_interval_ms() -> u64 {
    1000
}

fn default_maintenance_interval_secs() -> u64 {
    30
}

fn default_stuck_grace_secs() -> u64 {
    60
}

fn default_liveness_timeout_secs() -> u64 {
    900
}

fn default_launch_grace_secs() -> u64 {
    120
}

fn default_recent_results_limit() -> u32 {
    200
}

fn default_subscriber_buffer() -> usize {
    64
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            scheduler_interval_secs: default_scheduler_interval_secs(),
            guard_interval_secs: default_guard_interval_secs(),
            notifier_interval_ms: default_notifier_interval_ms(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            stuck_grace_secs: default_stuck_grace_secs(),
            liveness_timeout_secs: default_liveness_timeout_secs(),
            launch_grace_secs: default_launch_grace_secs(),
            recent_results_limit: default_recent_results_limit(),
            subscriber_buffer: default_subscriber_buffer(),
            heavy_work: HeavyWorkConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    pub fn guard_interval(&self) -> Duration {
        Duration::from_secs(self.guard_interval_secs)
    }

    pub fn notifier_interval(&self) -> Duration {
        Duration::from_millis(self.notifier_interval_ms)
    }

    pub fn maintenance_interval(&self) -> Option<Duration> {
        (self.maintenance_interval_secs > 0)
            .then(|| Duration::from_secs(self.maintenance_interval_secs))
    }

    pub fn stuck_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stuck_grace_secs as i64)
    }

    pub fn liveness_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.liveness_timeout_secs as i64)
    }

    pub fn launch_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.launch_grace_secs as i64)
    }

    /// Configured store path, or the default under the home directory.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

/// Thresholds for the log-count heuristic that exempts long-running items
/// from stuck-item recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeavyWorkConfig {
    pub collected_threshold: u64,
    pub found_threshold: u64,
}

impl Default for HeavyWorkConfig {
    fn default() -> Self {
        Self {
            collected_threshold: 100,
            found_threshold: 300,
        }
    }
}

/// How the external worker is recognised and started.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// File name of the worker script as it appears in a process command
    /// line.
    pub signature: String,
    /// Script passed to every launch command.
    pub script: String,
    /// Directory the worker is started in.
    pub working_dir: Option<PathBuf>,
    /// Launch strategies, tried in order until one spawns.
    pub commands: Vec<WorkerCommand>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            signature: "worker.py".to_string(),
            script: "worker.py".to_string(),
            working_dir: None,
            commands: vec![
                WorkerCommand::new("python3", &[]),
                WorkerCommand::new("python", &[]),
                WorkerCommand::new("env", &["python3"]),
            ],
        }
    }
}

/// One launch strategy: an interpreter and the arguments that precede the
/// script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}
