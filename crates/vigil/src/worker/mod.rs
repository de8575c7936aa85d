//! External worker lifecycle: launching, single-instance enforcement and the
//! process primitives both rely on.

pub mod guard;
pub mod launch;
pub mod process;
pub mod scheduler;

pub use guard::{GuardReport, KillFailure, ProcessGuard};
pub use launch::{LaunchAttemptError, LaunchRequest, Launcher, SpawnedWorker};
pub use process::{is_worker_command, ProcessEnvironment, SystemProcessEnvironment, WorkerProcess};
pub use scheduler::{Scheduler, SchedulerDecision};
