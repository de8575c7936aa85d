//! Command handlers for the `vigild` CLI.
//!
//! Commands are organized by domain:
//! - `batches`: batch creation and read views
//! - `admin`: finalize, requeue, reconcile, launch
//! - `workers`: worker process inspection and termination
//! - `config`: settings and stored credentials
//! - `live`: the foreground engine and the snapshot stream

pub mod admin;
pub mod batches;
pub mod config;
pub mod live;
pub mod workers;

use serde::Serialize;

/// Response envelope printed for every one-shot command.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl<T> From<vigil::Result<T>> for ApiResponse<T> {
    fn from(result: vigil::Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

/// Prints the envelope as one JSON document on stdout. Returns whether the
/// command succeeded.
pub fn emit<T: Serialize>(response: ApiResponse<T>) -> bool {
    match serde_json::to_string_pretty(&response) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            println!(r#"{{"success":false,"error":"failed to encode response: {e}"}}"#);
            return false;
        }
    }
    response.success
}
