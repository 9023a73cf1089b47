//! Canonical signing payload for device authentication assertions.
//!
//! The gateway reconstructs this exact string to verify the signature, so
//! field order and the pipe delimiter are wire contract, not style.

/// Version tag when no challenge nonce is bound into the payload.
pub const SIGNING_V1: &str = "v1";
/// Nonce-aware version tag; used whenever a challenge nonce is available.
pub const SIGNING_V2: &str = "v2";

/// Caller-supplied inputs bound into a signed assertion.
#[derive(Debug, Clone, Copy)]
pub struct AssertionInputs<'a> {
    pub client_id: &'a str,
    pub client_mode: &'a str,
    pub role: &'a str,
    pub scopes: &'a [String],
    pub signed_at_ms: u64,
    pub token: Option<&'a str>,
    pub nonce: Option<&'a str>,
}

/// Build the pipe-delimited payload:
/// `version|deviceId|clientId|clientMode|role|scopes|signedAtMs|token`
/// for v1, with `|nonce` appended for v2.
pub fn signing_payload(device_id: &str, inputs: &AssertionInputs<'_>) -> String {
    let version = if inputs.nonce.is_some() {
        SIGNING_V2
    } else {
        SIGNING_V1
    };
    let mut fields = vec![
        version.to_string(),
        device_id.to_string(),
        inputs.client_id.to_string(),
        inputs.client_mode.to_string(),
        inputs.role.to_string(),
        inputs.scopes.join(","),
        inputs.signed_at_ms.to_string(),
        inputs.token.unwrap_or_default().to_string(),
    ];
    if let Some(nonce) = inputs.nonce {
        fields.push(nonce.to_string());
    }
    fields.join("|")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn inputs(nonce: Option<&'static str>) -> AssertionInputs<'static> {
        static SCOPES: &[String] = &[];
        AssertionInputs {
            client_id: "deck",
            client_mode: "ui",
            role: "operator",
            scopes: SCOPES,
            signed_at_ms: 1_700_000_000_000,
            token: None,
            nonce,
        }
    }

    #[test]
    fn v1_payload_has_eight_fields() {
        let payload = signing_payload("device-1", &inputs(None));
        let fields: Vec<&str> = payload.split('|').collect();
        assert_eq!(fields.len(), 8);
        assert_eq!(fields[0], SIGNING_V1);
        assert_eq!(fields[1], "device-1");
        // Absent token serializes as the empty string, not a dropped field.
        assert_eq!(fields[7], "");
    }

    #[test]
    fn v2_payload_appends_nonce_as_ninth_field() {
        let payload = signing_payload("device-1", &inputs(Some("abc")));
        let fields: Vec<&str> = payload.split('|').collect();
        assert_eq!(fields.len(), 9);
        assert_eq!(fields[0], SIGNING_V2);
        assert_eq!(fields[8], "abc");
    }

    #[test]
    fn scopes_are_comma_joined() {
        let scopes = vec!["operator.read".to_string(), "operator.write".to_string()];
        let payload = signing_payload("d", &AssertionInputs {
            scopes: &scopes,
            ..inputs(None)
        });
        assert!(payload.contains("|operator.read,operator.write|"));
    }

    #[test]
    fn token_is_bound_when_present() {
        let payload = signing_payload("d", &AssertionInputs {
            token: Some("secret-token"),
            ..inputs(None)
        });
        assert!(payload.ends_with("|secret-token"));
    }
}
