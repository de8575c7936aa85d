//! Settings table and stored credentials.

use std::collections::BTreeMap;
use std::io::BufRead;

use secrecy::SecretString;
use serde::Serialize;
use vigil::Orchestrator;

use super::ApiResponse;

#[derive(Debug, Serialize)]
pub struct SettingValue {
    pub key: String,
    pub value: Option<String>,
}

pub fn get(orch: &Orchestrator, key: &str) -> ApiResponse<SettingValue> {
    orch.setting(key)
        .map(|value| SettingValue {
            key: key.to_string(),
            value,
        })
        .into()
}

pub fn set(orch: &Orchestrator, key: &str, value: &str) -> ApiResponse<SettingValue> {
    orch.set_setting(key, value)
        .map(|()| SettingValue {
            key: key.to_string(),
            value: Some(value.to_string()),
        })
        .into()
}

pub fn list(orch: &Orchestrator) -> ApiResponse<BTreeMap<String, String>> {
    orch.settings().map(|pairs| pairs.into_iter().collect()).into()
}

pub fn credential_users(orch: &Orchestrator) -> ApiResponse<Vec<String>> {
    orch.credential_users().into()
}

/// Stores the secret for `username`, read as one line from stdin so it
/// never appears in the process list.
pub fn save_credential(orch: &Orchestrator, username: &str) -> ApiResponse<Vec<String>> {
    let mut line = String::new();
    if let Err(e) = std::io::stdin().lock().read_line(&mut line) {
        return ApiResponse::err(format!("Failed to read secret from stdin: {e}"));
    }
    let secret = line.trim_end_matches(['\r', '\n']);
    if secret.is_empty() {
        return ApiResponse::err("Secret must not be empty");
    }

    orch.save_credential(username, &SecretString::from(secret))
        .and_then(|()| orch.credential_users())
        .into()
}
