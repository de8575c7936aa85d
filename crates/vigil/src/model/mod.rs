//! Domain vocabulary shared by the store, the engine and the daemon.

pub mod protocol_date;
pub mod source_ref;
pub mod status;

pub use protocol_date::{normalize_protocol_date, parse_protocol_date};
pub use source_ref::{parse_source_ref, SourceIds};
pub use status::{BatchStatus, ExecutionMode, ItemStatus};

/// Outcome text the worker records when the filing was confirmed.
pub const OUTCOME_FILED: &str = "Protocolizada";

/// Outcome text the worker records when no filing could be found.
pub const OUTCOME_NOT_FOUND: &str = "Não encontrada";

/// `worker_id` stamped on log entries written by the orchestrator itself.
pub const ORCHESTRATOR_WORKER_ID: &str = "orchestrator";
