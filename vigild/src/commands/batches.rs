//! Batch creation and read views.

use vigil::broadcast::{BatchView, ResultView, Summary};
use vigil::db::item_repo::ItemRow;
use vigil::db::log_repo::LogRow;
use vigil::{BatchReceipt, ExecutionMode, Orchestrator};

use super::ApiResponse;

/// Default number of log lines returned by `logs`.
pub const DEFAULT_LOG_LIMIT: u32 = 500;

pub fn enqueue(
    orch: &Orchestrator,
    sources: &[String],
    operator: Option<&str>,
    mode: ExecutionMode,
) -> ApiResponse<BatchReceipt> {
    orch.create_batch(sources, operator, mode).into()
}

pub fn list(orch: &Orchestrator) -> ApiResponse<Vec<BatchView>> {
    orch.list_batches().into()
}

pub fn items(orch: &Orchestrator, batch_id: &str) -> ApiResponse<Vec<ItemRow>> {
    orch.batch_items(batch_id).into()
}

pub fn logs(orch: &Orchestrator, batch_id: &str, limit: Option<u32>) -> ApiResponse<Vec<LogRow>> {
    orch.batch_logs(batch_id, limit.unwrap_or(DEFAULT_LOG_LIMIT)).into()
}

/// Results of one batch, or the most recent results across all batches.
pub fn results(
    orch: &Orchestrator,
    batch_id: Option<&str>,
    limit: Option<u32>,
) -> ApiResponse<Vec<ResultView>> {
    match batch_id {
        Some(id) => orch.batch_results(id).into(),
        None => orch
            .recent_results(limit.unwrap_or(orch.config().recent_results_limit))
            .into(),
    }
}

pub fn summary(orch: &Orchestrator) -> ApiResponse<Summary> {
    orch.summary().into()
}
