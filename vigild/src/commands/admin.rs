//! Administrative repairs and on-demand engine steps.

use vigil::orchestrator::{FinalizeReport, RequeueReport};
use vigil::{Orchestrator, ReconcileReport, SchedulerDecision};

use super::ApiResponse;

pub fn finalize(orch: &Orchestrator, batch_id: &str) -> ApiResponse<FinalizeReport> {
    orch.force_finalize(batch_id).into()
}

pub fn requeue(orch: &Orchestrator, batch_id: &str) -> ApiResponse<RequeueReport> {
    orch.requeue_failed(batch_id).into()
}

pub fn reconcile(orch: &Orchestrator) -> ApiResponse<ReconcileReport> {
    orch.reconcile_now().into()
}

/// Runs one scheduler tick right away.
pub fn launch(orch: &Orchestrator) -> ApiResponse<SchedulerDecision> {
    orch.launch_now().into()
}
