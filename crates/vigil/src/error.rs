use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VigilError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Batch not found: {0}")]
    BatchNotFound(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to list processes: {0}")]
    ListFailed(String),

    #[error("Failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to terminate process {pid}: {reason}")]
    KillFailed { pid: u32, reason: String },

    #[error("Process control is not supported on this platform")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, VigilError>;
