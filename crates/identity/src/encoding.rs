//! Key/signature byte encoding.
//!
//! Canonical form is unpadded base64url. Records written by older builds
//! used standard base64 (sometimes padded); those are still readable, but
//! every write re-encodes canonically.

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD},
};

/// Encode raw key or signature bytes in the canonical form.
pub fn encode_key(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a stored key, accepting legacy standard-base64 variants.
///
/// The fallback exists only to read old records; it is not a supported
/// input format.
pub fn decode_flexible(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    if let Ok(bytes) = URL_SAFE_NO_PAD.decode(encoded) {
        return Ok(bytes);
    }
    if let Ok(bytes) = STANDARD.decode(encoded) {
        tracing::debug!("decoded legacy standard-base64 key material");
        return Ok(bytes);
    }
    STANDARD_NO_PAD.decode(encoded).inspect(|_| {
        tracing::debug!("decoded legacy unpadded standard-base64 key material");
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn canonical_encoding_is_unpadded_url_safe() {
        // 0xfb 0xef 0xff encodes to characters that differ between the
        // standard and url-safe alphabets.
        let encoded = encode_key(&[0xfb, 0xef, 0xff]);
        assert_eq!(encoded, "--__");
        assert!(!encoded.ends_with('='));
    }

    #[test]
    fn decodes_canonical_form() {
        let bytes = vec![1u8, 2, 3, 4, 5];
        assert_eq!(decode_flexible(&encode_key(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn decodes_legacy_standard_base64() {
        let bytes = vec![0xfbu8, 0xef, 0xff, 0x01];
        let legacy = STANDARD.encode(&bytes);
        assert!(legacy.contains('+') || legacy.contains('/') || legacy.ends_with('='));
        assert_eq!(decode_flexible(&legacy).unwrap(), bytes);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_flexible("not base64 at all!!").is_err());
    }
}
