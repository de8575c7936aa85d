//! Derived views pushed to live observers.
//!
//! Every event is a full snapshot, so a consumer can apply them in any
//! order and repeat them without harm.

use chrono::{DateTime, Local, NaiveTime, Utc};
use serde::Serialize;

use crate::db::batch_repo::{self, BatchRow};
use crate::db::item_repo::{self, ItemRow, StatusCounts};
use crate::db::log_repo::{self, LogRow};
use crate::db::result_repo::{self, ResultRow};
use crate::db::timestamp::format_timestamp;
use crate::db::{Database, DatabaseError};
use crate::model::{normalize_protocol_date, BatchStatus, ItemStatus};

/// Upper bound on batches included in a batch list.
pub const BATCH_LIST_LIMIT: u32 = 500;

/// Upper bound on log lines sent for a single batch.
pub const BATCH_LOG_LIMIT: u32 = 500;

/// Headline counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_results: u64,
    pub active_batches: u64,
    pub pending_items: u64,
    pub results_today: u64,
}

/// A batch with its derived progress metrics.
#[derive(Debug, Clone, Serialize)]
pub struct BatchView {
    #[serde(flatten)]
    pub batch: BatchRow,
    /// Percentage of declared items done, one decimal, capped at 100.
    pub pct: f64,
    pub counts: StatusCounts,
}

/// A result with its protocol date in ISO form when it could be read.
#[derive(Debug, Clone, Serialize)]
pub struct ResultView {
    #[serde(flatten)]
    pub result: ResultRow,
    pub protocol_date_iso: Option<String>,
}

impl From<ResultRow> for ResultView {
    fn from(result: ResultRow) -> Self {
        let protocol_date_iso = result
            .protocol_date
            .as_deref()
            .and_then(normalize_protocol_date);
        Self {
            result,
            protocol_date_iso,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SnapshotEvent {
    Summary(Summary),
    #[serde(rename = "jobs")]
    Batches(Vec<BatchView>),
    RecentResults(Vec<ResultView>),
    Items {
        batch_id: String,
        items: Vec<ItemRow>,
    },
    Logs {
        batch_id: String,
        logs: Vec<LogRow>,
    },
    Results {
        batch_id: String,
        results: Vec<ResultView>,
    },
}

impl SnapshotEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            SnapshotEvent::Summary(_) => "summary",
            SnapshotEvent::Batches(_) => "jobs",
            SnapshotEvent::RecentResults(_) => "recent_results",
            SnapshotEvent::Items { .. } => "items",
            SnapshotEvent::Logs { .. } => "logs",
            SnapshotEvent::Results { .. } => "results",
        }
    }
}

/// `min(100, round(100 * progress / item_count, 1))`; zero for empty batches.
pub fn progress_pct(progress: i64, item_count: i64) -> f64 {
    if item_count <= 0 || progress <= 0 {
        return 0.0;
    }
    let pct = (1000.0 * progress as f64 / item_count as f64).round() / 10.0;
    pct.min(100.0)
}

/// Start of the operator's local day, in store format.
fn start_of_today() -> String {
    let midnight = Local::now().date_naive().and_time(NaiveTime::MIN);
    let utc = midnight
        .and_local_timezone(Local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| DateTime::from_naive_utc_and_offset(midnight, Utc));
    format_timestamp(utc)
}

pub fn build_summary(db: &Database) -> Result<Summary, DatabaseError> {
    Ok(Summary {
        total_results: result_repo::count_all(db)?,
        active_batches: batch_repo::count_in(db, &BatchStatus::NON_TERMINAL)?,
        pending_items: item_repo::count_by_status(db, ItemStatus::Pending)?,
        results_today: result_repo::count_since(db, &start_of_today())?,
    })
}

pub fn batch_views(db: &Database, limit: u32) -> Result<Vec<BatchView>, DatabaseError> {
    let batches = batch_repo::list(db, limit)?;
    let counts = item_repo::counts_by_batch(db)?;
    Ok(batches
        .into_iter()
        .map(|batch| BatchView {
            pct: progress_pct(batch.progress, batch.item_count),
            counts: counts.get(&batch.id).copied().unwrap_or_default(),
            batch,
        })
        .collect())
}

pub fn recent_results(db: &Database, limit: u32) -> Result<Vec<ResultView>, DatabaseError> {
    Ok(result_repo::recent(db, limit)?
        .into_iter()
        .map(ResultView::from)
        .collect())
}

pub fn batch_results(db: &Database, batch_id: &str) -> Result<Vec<ResultView>, DatabaseError> {
    Ok(result_repo::list_for_batch(db, batch_id)?
        .into_iter()
        .map(ResultView::from)
        .collect())
}

/// Events every subscriber receives.
pub fn global_events(db: &Database, recent_limit: u32) -> Result<Vec<SnapshotEvent>, DatabaseError> {
    Ok(vec![
        SnapshotEvent::Summary(build_summary(db)?),
        SnapshotEvent::Batches(batch_views(db, BATCH_LIST_LIMIT)?),
        SnapshotEvent::RecentResults(recent_results(db, recent_limit)?),
    ])
}

/// Events for subscribers watching one batch.
pub fn batch_events(db: &Database, batch_id: &str) -> Result<Vec<SnapshotEvent>, DatabaseError> {
    Ok(vec![
        SnapshotEvent::Items {
            batch_id: batch_id.to_string(),
            items: item_repo::list_for_batch(db, batch_id)?,
        },
        SnapshotEvent::Logs {
            batch_id: batch_id.to_string(),
            logs: log_repo::list_for_batch(db, batch_id, BATCH_LOG_LIMIT)?,
        },
        SnapshotEvent::Results {
            batch_id: batch_id.to_string(),
            results: batch_results(db, batch_id)?,
        },
    ])
}
