//! Orchestration engine for a single external batch worker.
//!
//! The store is shared with the worker process. The engine launches the
//! worker for queued batches, keeps at most one worker alive, recovers stuck
//! or silent work, reconciles results with their items and streams derived
//! views to observers.

pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod maintenance;
pub mod model;
pub mod orchestrator;
pub mod periodic;
pub mod worker;

pub use broadcast::{LiveHub, SnapshotEvent, Subscription};
pub use config::{load_config, OrchestratorConfig};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, ProcessError, Result, VigilError};
pub use logging::{init_logging, LogFormat};
pub use maintenance::{Maintenance, MaintenanceReport, ReconcileReport, WatchdogReport};
pub use model::{BatchStatus, ExecutionMode, ItemStatus};
pub use orchestrator::{BatchReceipt, Orchestrator};
pub use periodic::{PeriodicRunner, PeriodicTask, RunnerHandle};
pub use worker::{ProcessEnvironment, SchedulerDecision, SystemProcessEnvironment};
