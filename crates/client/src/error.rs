use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong between a caller and the gateway.
#[derive(Debug, Error)]
pub enum ClientError {
    /// `request()` was called without an established session.
    #[error("not connected to gateway")]
    NotConnected,

    /// The handshake reached no terminal outcome within the window.
    #[error("gateway handshake timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// An individual request expired; the connection itself is unaffected.
    #[error("request {id} timed out after {timeout:?}")]
    RequestTimeout { id: String, timeout: Duration },

    #[error("gateway transport: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// The socket closed (or the peer vanished) before a result arrived.
    #[error("gateway connection closed (code {code:?})")]
    Closed { code: Option<u16> },

    /// The gateway answered with `ok: false`. Authorization-flavoured
    /// rejections additionally update the shared auth state.
    #[error("gateway rejected request: {message}")]
    Rejected {
        code: Option<String>,
        message: String,
    },

    #[error("protocol: {0}")]
    Protocol(#[from] serde_json::Error),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_request_id() {
        let err = ClientError::RequestTimeout {
            id: "42".into(),
            timeout: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn rejected_carries_message() {
        let err = ClientError::Rejected {
            code: None,
            message: "missing scope".into(),
        };
        assert!(err.to_string().contains("missing scope"));
    }
}
