use std::path::Path;

use crate::config::schema::OrchestratorConfig;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<OrchestratorConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<OrchestratorConfig, ConfigError> {
    let config: OrchestratorConfig = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &OrchestratorConfig) -> Result<(), ConfigError> {
    let intervals = [
        ("scheduler_interval_secs", config.scheduler_interval_secs),
        ("guard_interval_secs", config.guard_interval_secs),
        ("notifier_interval_ms", config.notifier_interval_ms),
        ("stuck_grace_secs", config.stuck_grace_secs),
        ("liveness_timeout_secs", config.liveness_timeout_secs),
        ("launch_grace_secs", config.launch_grace_secs),
    ];
    for (name, value) in intervals {
        if value == 0 {
            return Err(invalid(format!("{} must be greater than zero", name)));
        }
    }

    if config.stuck_grace_secs >= config.liveness_timeout_secs {
        return Err(invalid(format!(
            "stuck_grace_secs ({}) must be below liveness_timeout_secs ({})",
            config.stuck_grace_secs, config.liveness_timeout_secs
        )));
    }

    if config.subscriber_buffer == 0 {
        return Err(invalid("subscriber_buffer must be greater than zero".into()));
    }

    if config.heavy_work.collected_threshold == 0 || config.heavy_work.found_threshold == 0 {
        return Err(invalid("heavy_work thresholds must be greater than zero".into()));
    }

    let worker = &config.worker;
    if worker.signature.trim().is_empty() {
        return Err(invalid("worker.signature must not be empty".into()));
    }
    if worker.commands.is_empty() {
        return Err(invalid("worker.commands must list at least one command".into()));
    }
    if let Some(idx) = worker
        .commands
        .iter()
        .position(|c| c.program.trim().is_empty())
    {
        return Err(invalid(format!("worker.commands[{}] has an empty program", idx)));
    }

    Ok(())
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Validation { message }
}
