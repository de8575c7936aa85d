//! Operating-system process control for the external worker.
//!
//! The engine only needs three primitives: list processes whose command
//! line carries the worker signature, start a detached worker, and
//! terminate one by pid. They sit behind [`ProcessEnvironment`] so the
//! scheduler and guard can be exercised without real processes.

use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::config::WorkerCommand;
use crate::error::ProcessError;
use crate::worker::launch::LaunchRequest;

/// A running process that looks like a worker.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct WorkerProcess {
    pub pid: u32,
    pub command_line: String,
}

pub trait ProcessEnvironment: Send + Sync {
    /// Processes running the worker script named by `signature` (see
    /// [`is_worker_command`]), in the order the operating system lists them. The calling process is never included.
    fn list_workers(&self, signature: &str) -> Result<Vec<WorkerProcess>, ProcessError>;

    /// Starts `command` detached for `request` and returns its pid.
    fn spawn(&self, command: &WorkerCommand, request: &LaunchRequest) -> Result<u32, ProcessError>;

    /// Asks process `pid` to terminate. A process that is already gone is
    /// not an error.
    fn kill(&self, pid: u32) -> Result<(), ProcessError>;
}

/// [`ProcessEnvironment`] backed by `ps`, `std::process` and signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessEnvironment;

impl SystemProcessEnvironment {
    pub fn new() -> Self {
        Self
    }
}

/// Whether `command_line` runs the worker script. The signature has to be a
/// whole argument after the program, either verbatim or as the file name of
/// a path, and be followed by the `--batch` flag every launch passes. An
/// editor or pager that merely opens the script does not count.
pub fn is_worker_command(command_line: &str, signature: &str) -> bool {
    let args: Vec<&str> = command_line.split_whitespace().collect();
    args.iter().enumerate().skip(1).any(|(i, arg)| {
        names_script(arg, signature)
            && args[i + 1..]
                .iter()
                .any(|a| *a == "--batch" || a.starts_with("--batch="))
    })
}

fn names_script(arg: &str, signature: &str) -> bool {
    arg == signature || arg.rsplit(|c: char| c == '/' || c == '\\').next() == Some(signature)
}

/// Parses `ps -o pid=,args=` output into worker processes.
pub(crate) fn parse_ps_output(output: &str, signature: &str, own_pid: u32) -> Vec<WorkerProcess> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (pid, args) = line.split_once(char::is_whitespace)?;
            let pid: u32 = pid.parse().ok()?;
            let args = args.trim();
            (pid != own_pid && is_worker_command(args, signature)).then(|| WorkerProcess {
                pid,
                command_line: args.to_string(),
            })
        })
        .collect()
}

impl ProcessEnvironment for SystemProcessEnvironment {
    #[cfg(unix)]
    fn list_workers(&self, signature: &str) -> Result<Vec<WorkerProcess>, ProcessError> {
        let output = Command::new("ps")
            .args(["-A", "-o", "pid=,args="])
            .output()
            .map_err(|e| ProcessError::ListFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(ProcessError::ListFailed(format!(
                "ps exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_ps_output(&stdout, signature, std::process::id()))
    }

    #[cfg(not(unix))]
    fn list_workers(&self, _signature: &str) -> Result<Vec<WorkerProcess>, ProcessError> {
        Err(ProcessError::Unsupported)
    }

    fn spawn(&self, command: &WorkerCommand, request: &LaunchRequest) -> Result<u32, ProcessError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .arg(&request.script)
            .arg("--batch")
            .arg(&request.batch_id)
            .env("WORKER_ID", &request.worker_id)
            .env("VIGIL_BATCH_ID", &request.batch_id)
            .env("VIGIL_MODE", request.mode.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if let Some(path) = &request.database_path {
            cmd.env("VIGIL_DATABASE", path);
        }
        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group: the worker survives the orchestrator's
            // terminal going away.
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| ProcessError::SpawnFailed {
            program: command.program.clone(),
            source: e,
        })?;
        let pid = child.id();

        // Reap the child so it does not linger as a zombie.
        let reaper = std::thread::Builder::new()
            .name(format!("vigil-reaper-{}", pid))
            .spawn(move || match child.wait() {
                Ok(status) => debug!(pid, %status, "Worker process exited"),
                Err(e) => warn!(pid, error = %e, "Failed to wait for worker process"),
            });
        if let Err(e) = reaper {
            warn!(pid, error = %e, "Could not start reaper thread");
        }

        Ok(pid)
    }

    #[cfg(unix)]
    fn kill(&self, pid: u32) -> Result<(), ProcessError> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| ProcessError::KillFailed {
            pid,
            reason: "pid out of range".to_string(),
        })?;
        if raw <= 0 {
            return Err(ProcessError::KillFailed {
                pid,
                reason: "refusing to signal a process group".to_string(),
            });
        }

        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(ProcessError::KillFailed {
                pid,
                reason: e.desc().to_string(),
            }),
        }
    }

    #[cfg(not(unix))]
    fn kill(&self, _pid: u32) -> Result<(), ProcessError> {
        Err(ProcessError::Unsupported)
    }
}
