//! Payload codec for negotiation messages
//!
//! Serializes a session description into a transport-safe string and back.
//! Two encodings are supported, chosen per session: plain JSON for relays
//! that accept structured payloads, and JSON deflated then base64-encoded
//! for relays with payload-size or alphabet constraints.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::types::SessionDescription;

/// Payload encoding, an explicit per-session choice (never autodetected)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// Plain `{"sdp", "type"}` JSON text
    Json,
    /// JSON -> deflate -> base64, for text-only or size-constrained relays
    DeflateBase64,
}

/// Decode failures; a corrupt payload never yields a partial description
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("compression failure: {0}")]
    Compression(#[from] std::io::Error),
}

/// Encode a session description for embedding in a relay envelope
pub fn encode(
    desc: &SessionDescription,
    encoding: PayloadEncoding,
) -> Result<String, CodecError> {
    let json = serde_json::to_string(desc)?;
    match encoding {
        PayloadEncoding::Json => Ok(json),
        PayloadEncoding::DeflateBase64 => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(json.as_bytes())?;
            let compressed = encoder.finish()?;
            Ok(BASE64.encode(compressed))
        }
    }
}

/// Exact inverse of [`encode`]
pub fn decode(
    payload: &str,
    encoding: PayloadEncoding,
) -> Result<SessionDescription, CodecError> {
    match encoding {
        PayloadEncoding::Json => Ok(serde_json::from_str(payload)?),
        PayloadEncoding::DeflateBase64 => {
            let compressed = BASE64.decode(payload)?;
            let mut decoder = ZlibDecoder::new(compressed.as_slice());
            let mut json = String::new();
            decoder.read_to_string(&mut json)?;
            Ok(serde_json::from_str(&json)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SdpKind;

    fn sample() -> SessionDescription {
        SessionDescription::new(
            "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\n",
            SdpKind::Offer,
        )
    }

    #[test]
    fn json_roundtrip() {
        let desc = sample();
        let payload = encode(&desc, PayloadEncoding::Json).unwrap();
        assert_eq!(decode(&payload, PayloadEncoding::Json).unwrap(), desc);
    }

    #[test]
    fn deflate_roundtrip() {
        let desc = SessionDescription::new("v=0 answer body", SdpKind::Answer);
        let payload = encode(&desc, PayloadEncoding::DeflateBase64).unwrap();
        assert_eq!(
            decode(&payload, PayloadEncoding::DeflateBase64).unwrap(),
            desc
        );
    }

    #[test]
    fn deflate_payload_is_base64() {
        let payload = encode(&sample(), PayloadEncoding::DeflateBase64).unwrap();
        assert!(BASE64.decode(&payload).is_ok());
    }

    #[test]
    fn corrupted_byte_is_detected() {
        let payload = encode(&sample(), PayloadEncoding::DeflateBase64).unwrap();
        let mut bytes = payload.into_bytes();
        let mid = bytes.len() / 2;
        bytes[mid] = if bytes[mid] == b'A' { b'B' } else { b'A' };
        let corrupted = String::from_utf8(bytes).unwrap();
        assert!(decode(&corrupted, PayloadEncoding::DeflateBase64).is_err());
    }

    #[test]
    fn garbage_is_rejected_by_both_encodings() {
        assert!(decode("not json at all", PayloadEncoding::Json).is_err());
        assert!(decode("!!!", PayloadEncoding::DeflateBase64).is_err());
    }

    #[test]
    fn missing_field_is_rejected() {
        assert!(decode(r#"{"sdp":"v=0"}"#, PayloadEncoding::Json).is_err());
    }
}
