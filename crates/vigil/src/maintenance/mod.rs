//! Store repair passes run on every notifier tick and on a background timer.

pub mod heavy_work;
pub mod reconciler;
pub mod watchdog;

use std::sync::Arc;

use serde::Serialize;

use crate::config::OrchestratorConfig;
use crate::db::{Database, DatabaseError};

pub use heavy_work::{HeavyWorkPredicate, LogCountHeuristic};
pub use reconciler::{ReconcileReport, Reconciler};
pub use watchdog::{Watchdog, WatchdogReport, WatchdogThresholds};

/// Combined outcome of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub reconcile: ReconcileReport,
    pub watchdog: WatchdogReport,
}

/// Reconciler followed by watchdog.
#[derive(Clone)]
pub struct Maintenance {
    reconciler: Reconciler,
    watchdog: Watchdog,
}

impl Maintenance {
    pub fn new(reconciler: Reconciler, watchdog: Watchdog) -> Self {
        Self {
            reconciler,
            watchdog,
        }
    }

    /// Builds both passes from configuration with the default heavy-work
    /// heuristic.
    pub fn from_config(db: Database, config: &OrchestratorConfig) -> Self {
        Self::with_predicate(
            db,
            config,
            Arc::new(LogCountHeuristic::from_config(&config.heavy_work)),
        )
    }

    pub fn with_predicate(
        db: Database,
        config: &OrchestratorConfig,
        heavy_work: Arc<dyn HeavyWorkPredicate>,
    ) -> Self {
        let thresholds = WatchdogThresholds {
            stuck_grace: config.stuck_grace(),
            liveness_timeout: config.liveness_timeout(),
            launch_grace: config.launch_grace(),
        };
        Self::new(
            Reconciler::new(db.clone()),
            Watchdog::new(db, heavy_work, thresholds),
        )
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    pub fn run(&self) -> Result<MaintenanceReport, DatabaseError> {
        let reconcile = self.reconciler.run()?;
        let watchdog = self.watchdog.run()?;
        Ok(MaintenanceReport {
            reconcile,
            watchdog,
        })
    }
}
