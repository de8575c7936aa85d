//! Daemon state: configuration resolution and the shared orchestrator.

use std::path::{Path, PathBuf};

use log::info;
use vigil::{load_config, Orchestrator, OrchestratorConfig};

/// Config file used when `--config` is not given and the file exists.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".vigil").join("config.json"))
}

pub struct DaemonState {
    pub orchestrator: Orchestrator,
}

impl DaemonState {
    pub fn open(config_path: Option<&Path>, database: Option<&Path>) -> vigil::Result<Self> {
        let mut config = resolve_config(config_path)?;
        if let Some(path) = database {
            config.database_path = Some(path.to_path_buf());
        }

        let orchestrator = Orchestrator::open(config)?;
        if let Some(path) = orchestrator.database().path() {
            info!("Using database {}", path.display());
        }

        Ok(Self { orchestrator })
    }
}

fn resolve_config(explicit: Option<&Path>) -> vigil::Result<OrchestratorConfig> {
    if let Some(path) = explicit {
        return Ok(load_config(path)?);
    }
    match default_config_path() {
        Some(path) if path.is_file() => {
            info!("Loading configuration from {}", path.display());
            Ok(load_config(&path)?)
        }
        _ => Ok(OrchestratorConfig::default()),
    }
}
