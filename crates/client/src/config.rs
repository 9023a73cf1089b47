use std::time::Duration;

use pylon_protocol::{
    CONNECT_TIMEOUT_MS, DEFAULT_GATEWAY_URL, RECONNECT_DELAY_MS, REQUEST_TIMEOUT_MS, roles, scopes,
};

pub const ENV_GATEWAY_URL: &str = "PYLON_GATEWAY_URL";
pub const ENV_GATEWAY_TOKEN: &str = "PYLON_GATEWAY_TOKEN";
pub const ENV_DEBUG: &str = "PYLON_DEBUG";

/// Connection settings for a [`crate::GatewayClient`].
///
/// Timing fields default to the protocol constants; tests override them to
/// run with short windows.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    /// Optional bearer token forwarded in the connect request.
    pub token: Option<String>,
    pub client_id: String,
    pub client_mode: String,
    pub role: String,
    /// Scopes requested during the handshake.
    pub scopes: Vec<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.into(),
            token: None,
            client_id: "pylon-deck".into(),
            client_mode: "ui".into(),
            role: roles::OPERATOR.into(),
            scopes: vec![scopes::READ.into()],
            connect_timeout: Duration::from_millis(CONNECT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(REQUEST_TIMEOUT_MS),
            reconnect_delay: Duration::from_millis(RECONNECT_DELAY_MS),
        }
    }
}

impl GatewayConfig {
    /// Resolve configuration from the environment
    /// (`PYLON_GATEWAY_URL` / `PYLON_GATEWAY_TOKEN`).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_GATEWAY_URL).filter(|v| !v.is_empty()) {
            config.url = url;
        }
        if let Some(token) = lookup(ENV_GATEWAY_TOKEN).filter(|v| !v.is_empty()) {
            config.token = Some(token);
        }
        config
    }
}

/// True when the `PYLON_DEBUG` toggle is set. Front-ends use this to widen
/// their default log filter.
pub fn debug_enabled() -> bool {
    debug_flag(std::env::var(ENV_DEBUG).ok().as_deref())
}

fn debug_flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = GatewayConfig::default();
        assert_eq!(config.url, DEFAULT_GATEWAY_URL);
        assert!(config.token.is_none());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.scopes, vec![scopes::READ.to_string()]);
    }

    #[test]
    fn lookup_overrides_url_and_token() {
        let config = GatewayConfig::from_lookup(|key| match key {
            ENV_GATEWAY_URL => Some("ws://gateway.local:9999".into()),
            ENV_GATEWAY_TOKEN => Some("tok".into()),
            _ => None,
        });
        assert_eq!(config.url, "ws://gateway.local:9999");
        assert_eq!(config.token.as_deref(), Some("tok"));
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let config = GatewayConfig::from_lookup(|_| Some(String::new()));
        assert_eq!(config.url, DEFAULT_GATEWAY_URL);
        assert!(config.token.is_none());
    }

    #[test]
    fn debug_flag_values() {
        assert!(debug_flag(Some("1")));
        assert!(debug_flag(Some("true")));
        assert!(!debug_flag(Some("0")));
        assert!(!debug_flag(Some("false")));
        assert!(!debug_flag(Some("")));
        assert!(!debug_flag(None));
    }
}
