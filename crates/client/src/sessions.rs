//! Typed view of the gateway's session inventory.

use serde::{Deserialize, Serialize};

/// Filter accepted by `sessions.list`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Only sessions active within the last N minutes.
    #[serde(rename = "activeMinutes", skip_serializing_if = "Option::is_none")]
    pub active_minutes: Option<u64>,
}

/// One row of the gateway's session inventory. Fields beyond the key are
/// best-effort — older gateways omit most of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub updated_at: Option<u64>,
    #[serde(default)]
    pub message_count: Option<u64>,
}

/// Parse a `sessions.list` payload: a bare array, or wrapped in a
/// `{"sessions": [...]}` object.
pub(crate) fn parse_session_list(
    payload: serde_json::Value,
) -> Result<Vec<SessionSummary>, serde_json::Error> {
    match payload {
        serde_json::Value::Object(mut map) if map.contains_key("sessions") => {
            let sessions = map.remove("sessions").unwrap_or_default();
            serde_json::from_value(sessions)
        },
        other => serde_json::from_value(other),
    }
}
