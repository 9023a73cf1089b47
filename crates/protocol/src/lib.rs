//! Gateway WebSocket/RPC wire protocol, as seen from the client side.
//!
//! All communication uses JSON frames over a single WebSocket, discriminated
//! by `type`:
//! - `req`      — client → gateway RPC call
//! - `res`      — gateway → client RPC result, correlated by `id`
//! - `event`    — gateway → client server-push
//! - `hello-ok` — handshake acknowledgement; may arrive as a top-level push
//!   or as the payload of the `res` that answers the connect request

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

pub const PROTOCOL_VERSION: u32 = 3;

pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:18789";

/// Handshake must reach a terminal outcome within this window.
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Per-request deadline for correlated RPC calls.
pub const REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Delay before re-dialing after an unclean mid-session close.
pub const RECONNECT_DELAY_MS: u64 = 5_000;

/// Reserved event carrying the handshake nonce; never fanned out to
/// subscribers.
pub const CHALLENGE_EVENT: &str = "connect.challenge";

/// WebSocket close code for a clean, expected shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

// ── Roles and scopes ─────────────────────────────────────────────────────────

pub mod roles {
    pub const OPERATOR: &str = "operator";
}

pub mod scopes {
    pub const ADMIN: &str = "operator.admin";
    pub const READ: &str = "operator.read";
    pub const WRITE: &str = "operator.write";
    pub const APPROVALS: &str = "operator.approvals";
    pub const PAIRING: &str = "operator.pairing";
}

// ── Error shape ──────────────────────────────────────────────────────────────

/// Error payload of a failed `res` frame. Older gateways omit `code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl ErrorShape {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Closed discriminated union of every frame the wire can carry.
///
/// Exhaustive matching on this enum is what keeps frame dispatch honest —
/// an unknown `type` fails to parse instead of being half-handled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayFrame {
    #[serde(rename = "req")]
    Request(RequestBody),
    #[serde(rename = "res")]
    Response(ResponseBody),
    #[serde(rename = "event")]
    Event(EventBody),
    #[serde(rename = "hello-ok")]
    Hello(HelloOk),
}

impl GatewayFrame {
    /// Build an outbound RPC request frame.
    pub fn request(
        id: impl Into<String>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self::Request(RequestBody {
            id: id.into(),
            method: method.into(),
            params,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestBody {
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseBody {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBody {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

/// Payload of the reserved `connect.challenge` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

// ── Connect handshake ────────────────────────────────────────────────────────

/// Parameters sent by the client in the `connect` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "minProtocol")]
    pub min_protocol: u32,
    #[serde(rename = "maxProtocol")]
    pub max_protocol: u32,
    pub client: ClientInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<ConnectAuth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
}

/// Signed device assertion proving possession of the installation's
/// private key. Absent when signing failed and the client fell back to
/// token-only auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub signature: String,
    #[serde(rename = "signedAt")]
    pub signed_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Handshake acknowledgement from the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloOk {
    pub protocol: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<HelloAuth>,
}

/// Auth block of `hello-ok`. A missing `scopes` list means the gateway does
/// not enforce scoping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ── Frame discrimination ───────────────────────────────────────────

    #[test]
    fn request_frame_round_trip() {
        let frame = GatewayFrame::request("7", "sessions.list", Some(serde_json::json!({})));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "req");
        assert_eq!(json["id"], "7");
        assert_eq!(json["method"], "sessions.list");

        let parsed: GatewayFrame = serde_json::from_value(json).unwrap();
        match parsed {
            GatewayFrame::Request(body) => assert_eq!(body.method, "sessions.list"),
            other => panic!("expected req frame, got {other:?}"),
        }
    }

    #[test]
    fn request_frame_omits_null_params() {
        let frame = GatewayFrame::request("1", "health", None);
        let json = serde_json::to_value(&frame).unwrap();
        assert!(!json.as_object().unwrap().contains_key("params"));
    }

    #[test]
    fn response_frame_parses_error_without_code() {
        let json = r#"{"type":"res","id":"3","ok":false,"error":{"message":"missing scope"}}"#;
        let frame: GatewayFrame = serde_json::from_str(json).unwrap();
        match frame {
            GatewayFrame::Response(body) => {
                assert!(!body.ok);
                let err = body.error.unwrap();
                assert_eq!(err.message, "missing scope");
                assert!(err.code.is_none());
            },
            other => panic!("expected res frame, got {other:?}"),
        }
    }

    #[test]
    fn event_frame_round_trip() {
        let json = r#"{"type":"event","event":"presence","payload":{"count":2},"seq":9}"#;
        let frame: GatewayFrame = serde_json::from_str(json).unwrap();
        match frame {
            GatewayFrame::Event(body) => {
                assert_eq!(body.event, "presence");
                assert_eq!(body.seq, Some(9));
            },
            other => panic!("expected event frame, got {other:?}"),
        }
    }

    #[test]
    fn hello_ok_top_level_frame() {
        let json = r#"{"type":"hello-ok","protocol":3,"auth":{"scopes":["operator.read"]}}"#;
        let frame: GatewayFrame = serde_json::from_str(json).unwrap();
        match frame {
            GatewayFrame::Hello(hello) => {
                assert_eq!(hello.protocol, 3);
                let scopes = hello.auth.unwrap().scopes.unwrap();
                assert_eq!(scopes, vec![scopes::READ.to_string()]);
            },
            other => panic!("expected hello-ok frame, got {other:?}"),
        }
    }

    #[test]
    fn hello_ok_without_auth_block() {
        let hello: HelloOk = serde_json::from_str(r#"{"protocol":3}"#).unwrap();
        assert!(hello.auth.is_none());
    }

    #[test]
    fn unknown_frame_type_rejected() {
        let json = r#"{"type":"mystery","id":"1"}"#;
        assert!(serde_json::from_str::<GatewayFrame>(json).is_err());
    }

    // ── Connect params ─────────────────────────────────────────────────

    #[test]
    fn connect_params_wire_names() {
        let params = ConnectParams {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client: ClientInfo {
                id: "deck".into(),
                version: "0.4.0".into(),
                platform: "linux".into(),
                mode: "ui".into(),
            },
            role: Some(roles::OPERATOR.into()),
            scopes: Some(vec![scopes::READ.into()]),
            device: Some(DeviceInfo {
                id: "fp".into(),
                public_key: "pk".into(),
                signature: "sig".into(),
                signed_at: 1_700_000_000_000,
                nonce: Some("abc".into()),
            }),
            auth: None,
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["minProtocol"], PROTOCOL_VERSION);
        assert_eq!(json["device"]["publicKey"], "pk");
        assert_eq!(json["device"]["signedAt"], 1_700_000_000_000u64);
        assert!(!json.as_object().unwrap().contains_key("auth"));
    }

    #[test]
    fn challenge_payload_missing_nonce() {
        let payload: ChallengePayload = serde_json::from_str("{}").unwrap();
        assert!(payload.nonce.is_none());
    }
}
