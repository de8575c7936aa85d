//! Terminates duplicate worker processes.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, warn};

use crate::error::ProcessError;
use crate::worker::process::ProcessEnvironment;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GuardReport {
    pub found: usize,
    pub kept: Option<u32>,
    pub killed: Vec<u32>,
    pub failed: Vec<KillFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KillFailure {
    pub pid: u32,
    pub reason: String,
}

#[derive(Clone)]
pub struct ProcessGuard {
    env: Arc<dyn ProcessEnvironment>,
    signature: String,
}

impl ProcessGuard {
    pub fn new(env: Arc<dyn ProcessEnvironment>, signature: impl Into<String>) -> Self {
        Self {
            env,
            signature: signature.into(),
        }
    }

    /// Keeps the first worker in listing order and terminates the others.
    pub fn sweep(&self) -> Result<GuardReport, ProcessError> {
        let workers = self.env.list_workers(&self.signature)?;
        let mut report = GuardReport {
            found: workers.len(),
            kept: workers.first().map(|w| w.pid),
            ..Default::default()
        };

        if workers.len() <= 1 {
            return Ok(report);
        }

        warn!(
            found = workers.len(),
            kept = ?report.kept,
            "Multiple worker processes running, terminating extras"
        );

        for worker in workers.iter().skip(1) {
            match self.env.kill(worker.pid) {
                Ok(()) => report.killed.push(worker.pid),
                Err(e) => {
                    error!(pid = worker.pid, error = %e, "Failed to terminate duplicate worker");
                    report.failed.push(KillFailure {
                        pid: worker.pid,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerCommand;
    use crate::worker::launch::LaunchRequest;
    use crate::worker::process::WorkerProcess;
    use std::sync::Mutex;

    struct Table {
        pids: Mutex<Vec<u32>>,
        protected: u32,
    }

    impl ProcessEnvironment for Table {
        fn list_workers(&self, _signature: &str) -> Result<Vec<WorkerProcess>, ProcessError> {
            Ok(self
                .pids
                .lock()
                .unwrap()
                .iter()
                .map(|&pid| WorkerProcess {
                    pid,
                    command_line: format!("python worker.py #{pid}"),
                })
                .collect())
        }

        fn spawn(&self, _c: &WorkerCommand, _r: &LaunchRequest) -> Result<u32, ProcessError> {
            Err(ProcessError::Unsupported)
        }

        fn kill(&self, pid: u32) -> Result<(), ProcessError> {
            if pid == self.protected {
                return Err(ProcessError::KillFailed {
                    pid,
                    reason: "Operation not permitted".into(),
                });
            }
            self.pids.lock().unwrap().retain(|&p| p != pid);
            Ok(())
        }
    }

    fn guard(pids: Vec<u32>, protected: u32) -> (ProcessGuard, Arc<Table>) {
        let table = Arc::new(Table {
            pids: Mutex::new(pids),
            protected,
        });
        (ProcessGuard::new(table.clone(), "worker.py"), table)
    }

    #[test]
    fn test_single_worker_untouched() {
        let (g, table) = guard(vec![10], 0);
        let report = g.sweep().unwrap();
        assert_eq!(report.found, 1);
        assert_eq!(report.kept, Some(10));
        assert!(report.killed.is_empty());
        assert_eq!(*table.pids.lock().unwrap(), vec![10]);
    }

    #[test]
    fn test_no_workers() {
        let (g, _) = guard(vec![], 0);
        assert_eq!(g.sweep().unwrap(), GuardReport::default());
    }

    #[test]
    fn test_duplicates_terminated() {
        let (g, table) = guard(vec![10, 20, 30], 0);
        let report = g.sweep().unwrap();
        assert_eq!(report.kept, Some(10));
        assert_eq!(report.killed, vec![20, 30]);
        assert_eq!(*table.pids.lock().unwrap(), vec![10]);
    }

    #[test]
    fn test_kill_failure_reported() {
        let (g, _) = guard(vec![10, 20, 30], 20);
        let report = g.sweep().unwrap();
        assert_eq!(report.killed, vec![30]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].pid, 20);
    }
}
