//! Batch and item state machines.
//!
//! States are closed enums; the store keeps their snake_case text form.
//! Transitions are applied by the repositories as conditional updates whose
//! `WHERE status IN (...)` clause comes from [`BatchStatus::transition_guard`]
//! / [`ItemStatus::transition_guard`], so only edges allowed by
//! `can_transition_to` can ever be written.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of a batch: `queued → starting → running → {done, error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Starting,
    Running,
    Done,
    Error,
}

impl BatchStatus {
    pub const ALL: [BatchStatus; 5] = [
        BatchStatus::Queued,
        BatchStatus::Starting,
        BatchStatus::Running,
        BatchStatus::Done,
        BatchStatus::Error,
    ];

    pub const NON_TERMINAL: [BatchStatus; 3] = [
        BatchStatus::Queued,
        BatchStatus::Starting,
        BatchStatus::Running,
    ];

    /// Statuses that count as an occupied worker slot.
    pub const ACTIVE: [BatchStatus; 2] = [BatchStatus::Starting, BatchStatus::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Starting => "starting",
            BatchStatus::Running => "running",
            BatchStatus::Done => "done",
            BatchStatus::Error => "error",
        }
    }

    /// Every spelling the store may hold for this status.
    fn stored_forms(&self) -> &'static [&'static str] {
        match self {
            // Rows written before the queue existed used "pending".
            BatchStatus::Queued => &["queued", "pending"],
            BatchStatus::Starting => &["starting"],
            BatchStatus::Running => &["running"],
            BatchStatus::Done => &["done"],
            BatchStatus::Error => &["error"],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Done | BatchStatus::Error)
    }

    /// Whether moving from `self` to `next` is allowed.
    ///
    /// `{done, error} → queued` is the administrative reopen used when
    /// failed items are requeued; nothing else leaves a terminal state.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        match (self, next) {
            (Queued, Starting) | (Queued, Running) => true,
            (Starting, Running) | (Starting, Queued) => true,
            (Running, Queued) => true,
            (Done, Queued) | (Error, Queued) => true,
            (from, Done) | (from, Error) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Quoted, comma-separated list for use inside `IN (...)` clauses.
    pub fn sql_set(statuses: &[BatchStatus]) -> String {
        quoted_list(statuses.iter().flat_map(|s| s.stored_forms().iter().copied()))
    }

    /// `IN (...)` body guarding an update to `next`: the statuses of `from`
    /// that may move there.
    pub fn transition_guard(from: &[BatchStatus], next: BatchStatus) -> String {
        let allowed: Vec<BatchStatus> = from
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(next))
            .collect();
        Self::sql_set(&allowed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "queued" | "pending" => Ok(BatchStatus::Queued),
            "starting" => Ok(BatchStatus::Starting),
            "running" => Ok(BatchStatus::Running),
            "done" => Ok(BatchStatus::Done),
            "error" => Ok(BatchStatus::Error),
            other => Err(other.to_string()),
        }
    }
}

/// Lifecycle of an item: `pending → running → {done, failed}` with the
/// recovery edges `running → pending` and `failed → pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 4] = [
        ItemStatus::Pending,
        ItemStatus::Running,
        ItemStatus::Done,
        ItemStatus::Failed,
    ];

    pub const NON_TERMINAL: [ItemStatus; 2] = [ItemStatus::Pending, ItemStatus::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Running => "running",
            ItemStatus::Done => "done",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::Failed)
    }

    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Done)
                | (Running, Failed)
                | (Running, Pending)
                | (Failed, Pending)
                // Batch timeout fails items that never started.
                | (Pending, Failed)
        )
    }

    pub fn sql_set(statuses: &[ItemStatus]) -> String {
        quoted_list(statuses.iter().map(|s| s.as_str()))
    }

    pub fn transition_guard(from: &[ItemStatus], next: ItemStatus) -> String {
        let allowed: Vec<ItemStatus> = from
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(next))
            .collect();
        Self::sql_set(&allowed)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(ItemStatus::Pending),
            "running" => Ok(ItemStatus::Running),
            "done" => Ok(ItemStatus::Done),
            "failed" => Ok(ItemStatus::Failed),
            other => Err(other.to_string()),
        }
    }
}

/// How the external worker drives its browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Headless,
    Visible,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Headless => "headless",
            ExecutionMode::Visible => "visible",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "headless" | "" => Ok(ExecutionMode::Headless),
            "visible" => Ok(ExecutionMode::Visible),
            other => Err(other.to_string()),
        }
    }
}

fn quoted_list<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values
        .map(|v| format!("'{}'", v))
        .collect::<Vec<_>>()
        .join(",")
}
