//! Authorization state derivation.
//!
//! The state is derived from exactly two sources: the granted scope list on
//! a successful handshake, and the error text of a rejected request. Nothing
//! else may set it.

use std::{fmt, sync::LazyLock};

use regex::Regex;

use pylon_protocol::scopes;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthState {
    #[default]
    Unknown,
    Authorized,
    /// The device has no grants yet; pairing approval is pending.
    Unpaired,
    Unauthorized,
    /// Granted some scopes, but not the read capability the dashboard needs.
    Degraded,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Authorized => "authorized",
            Self::Unpaired => "unpaired",
            Self::Unauthorized => "unauthorized",
            Self::Degraded => "degraded",
        })
    }
}

/// Human-readable context for why the device is not authorized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingInfo {
    /// Pairing request id extracted from the gateway's error text, when one
    /// was present.
    pub request_id: Option<String>,
    pub message: String,
}

/// Derive the state from the scope list granted in `hello-ok`.
///
/// A missing list means the gateway does not enforce scoping at all.
pub fn from_scopes(granted: Option<&[String]>) -> AuthState {
    match granted {
        None => AuthState::Authorized,
        Some(list) if list.iter().any(|s| s == scopes::READ) => AuthState::Authorized,
        Some([]) => AuthState::Unpaired,
        Some(_) => AuthState::Degraded,
    }
}

#[allow(clippy::expect_used)]
static REQUEST_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)request:\s*([A-Za-z0-9_-]+)").expect("static pattern"));

#[allow(clippy::expect_used)]
static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
        .expect("static pattern")
});

/// Classify a rejected request's error text.
///
/// Returns the new state plus pairing info, or `None` when the rejection
/// says nothing about authorization and the state should stay as-is. When a
/// missing-scope rejection carries no request id, the id from `previous`
/// pairing info is preserved.
pub fn classify_rejection(
    message: &str,
    previous: Option<&PairingInfo>,
) -> Option<(AuthState, PairingInfo)> {
    let lower = message.to_lowercase();

    if lower.contains("missing scope") || lower.contains(scopes::READ) {
        let request_id = extract_request_id(message)
            .or_else(|| previous.and_then(|p| p.request_id.clone()));
        return Some((AuthState::Unpaired, PairingInfo {
            request_id,
            message: message.to_string(),
        }));
    }

    if lower.contains("unauthorized") || lower.contains("forbidden") {
        return Some((AuthState::Unauthorized, PairingInfo {
            request_id: None,
            message: message.to_string(),
        }));
    }

    None
}

/// Pull a pairing request id out of the error text: an explicit
/// `request: <id>` marker wins, otherwise any UUID-shaped token.
fn extract_request_id(message: &str) -> Option<String> {
    if let Some(caps) = REQUEST_ID_RE.captures(message) {
        return Some(caps[1].to_string());
    }
    UUID_RE.find(message).map(|m| m.as_str().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    // ── Scope derivation ───────────────────────────────────────────────

    #[test]
    fn no_scope_list_means_authorized() {
        assert_eq!(from_scopes(None), AuthState::Authorized);
    }

    #[test]
    fn read_scope_means_authorized() {
        let granted = strings(&["operator.read"]);
        assert_eq!(from_scopes(Some(&granted[..])), AuthState::Authorized);
    }

    #[test]
    fn empty_scope_list_means_unpaired() {
        let granted: Vec<String> = vec![];
        assert_eq!(from_scopes(Some(&granted[..])), AuthState::Unpaired);
    }

    #[test]
    fn other_scopes_without_read_mean_degraded() {
        let granted = strings(&["other.scope"]);
        assert_eq!(from_scopes(Some(&granted[..])), AuthState::Degraded);
    }

    // ── Rejection classification ───────────────────────────────────────

    #[test]
    fn missing_scope_text_means_unpaired() {
        let (state, pairing) =
            classify_rejection("Missing scope for this method", None).unwrap();
        assert_eq!(state, AuthState::Unpaired);
        assert_eq!(pairing.message, "Missing scope for this method");
        assert!(pairing.request_id.is_none());
    }

    #[test]
    fn read_scope_name_means_unpaired() {
        let (state, _) =
            classify_rejection("caller lacks OPERATOR.READ", None).unwrap();
        assert_eq!(state, AuthState::Unpaired);
    }

    #[test]
    fn explicit_request_marker_is_extracted() {
        let (_, pairing) =
            classify_rejection("missing scope (request: pair_01HX)", None).unwrap();
        assert_eq!(pairing.request_id.as_deref(), Some("pair_01HX"));
    }

    #[test]
    fn uuid_shaped_token_is_extracted() {
        let msg = "missing scope; approve 123e4567-e89b-12d3-a456-426614174000 to continue";
        let (_, pairing) = classify_rejection(msg, None).unwrap();
        assert_eq!(
            pairing.request_id.as_deref(),
            Some("123e4567-e89b-12d3-a456-426614174000")
        );
    }

    #[test]
    fn previous_request_id_is_preserved() {
        let previous = PairingInfo {
            request_id: Some("pair_old".into()),
            message: "earlier".into(),
        };
        let (_, pairing) =
            classify_rejection("missing scope, not yet approved", Some(&previous)).unwrap();
        assert_eq!(pairing.request_id.as_deref(), Some("pair_old"));
    }

    #[test]
    fn forbidden_means_unauthorized() {
        let (state, pairing) = classify_rejection("Forbidden", None).unwrap();
        assert_eq!(state, AuthState::Unauthorized);
        assert_eq!(pairing.message, "Forbidden");
    }

    #[test]
    fn unrelated_errors_leave_state_unchanged() {
        assert!(classify_rejection("session not found", None).is_none());
        assert!(classify_rejection("internal error", None).is_none());
    }
}
