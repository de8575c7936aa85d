//! Worker process inspection.

use serde::Serialize;
use vigil::worker::WorkerProcess;
use vigil::Orchestrator;

use super::ApiResponse;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KillResponse {
    pub pid: u32,
}

pub fn list(orch: &Orchestrator) -> ApiResponse<Vec<WorkerProcess>> {
    orch.list_workers().into()
}

pub fn kill(orch: &Orchestrator, pid: u32) -> ApiResponse<KillResponse> {
    orch.kill_worker(pid).map(|()| KillResponse { pid }).into()
}
