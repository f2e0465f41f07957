//! Wire envelope for distributed cache entries.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::cache::CacheError;

/// Envelope format version. Bump when the wire layout changes; entries
/// with an unknown version are treated as undecodable.
const VERSION: u8 = 1;

/// Serialized form of a Tier-2 entry: metadata plus the (possibly
/// gzip-compressed) payload bytes.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub v: u8,
    pub compressed: bool,
    pub created_at_ms: i64,
    pub stale_at_ms: Option<i64>,
    #[serde(with = "b64")]
    pub payload: Vec<u8>,
}

/// Result of encoding a payload for the distributed tier.
#[derive(Debug)]
pub(crate) struct Encoded {
    pub wire: Vec<u8>,
    /// Bytes saved by compression; zero when stored raw.
    pub bytes_saved: u64,
}

/// Envelope-encode a serialized payload.
///
/// Payloads above `compression_threshold` are gzip-compressed, but the
/// compressed form is only kept when it is actually smaller.
pub(crate) fn encode(
    payload: &[u8],
    compression_threshold: usize,
    stale_at_ms: Option<i64>,
) -> Result<Encoded, CacheError> {
    let mut compressed = false;
    let mut body = payload.to_vec();

    if payload.len() > compression_threshold {
        let deflated = gzip(payload)?;

        if deflated.len() < payload.len() {
            body = deflated;
            compressed = true;
        }
    }

    let bytes_saved = if compressed {
        (payload.len() - body.len()) as u64
    } else {
        0
    };

    let envelope = Envelope {
        v: VERSION,
        compressed,
        created_at_ms: Timestamp::now().as_millisecond(),
        stale_at_ms,
        payload: body,
    };

    let wire = serde_json::to_vec(&envelope).map_err(CacheError::Serialize)?;

    Ok(Encoded { wire, bytes_saved })
}

/// Decode an envelope back to the raw payload and its staleness mark.
pub(crate) fn decode(wire: &[u8]) -> Result<(Vec<u8>, Option<i64>), CacheError> {
    use serde::de::Error as _;

    let envelope: Envelope = serde_json::from_slice(wire).map_err(CacheError::Decode)?;

    if envelope.v != VERSION {
        return Err(CacheError::Decode(serde_json::Error::custom(format!(
            "unsupported envelope version {}",
            envelope.v
        ))));
    }

    let payload = if envelope.compressed {
        gunzip(&envelope.payload)?
    } else {
        envelope.payload
    };

    Ok((payload, envelope.stale_at_ms))
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(CacheError::Compression)?;
    encoder.finish().map_err(CacheError::Compression)
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(CacheError::Compression)?;

    Ok(out)
}

/// Base64 transport for the payload bytes inside the JSON envelope.
mod b64 {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    use super::BASE64;
    use base64::Engine as _;

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;

    #[test]
    fn small_payloads_are_stored_raw() -> TestResult {
        let payload = br#"{"final_price":9000}"#;

        let encoded = encode(payload, 1024, None)?;
        assert_eq!(encoded.bytes_saved, 0);

        let (decoded, stale_at) = decode(&encoded.wire)?;
        assert_eq!(decoded, payload);
        assert_eq!(stale_at, None);

        Ok(())
    }

    #[test]
    fn large_compressible_payloads_shrink() -> TestResult {
        let payload = "abcdefgh".repeat(1_000).into_bytes();

        let encoded = encode(&payload, 64, Some(1_000))?;
        assert!(encoded.bytes_saved > 0, "expected compression to save bytes");

        let (decoded, stale_at) = decode(&encoded.wire)?;
        assert_eq!(decoded, payload);
        assert_eq!(stale_at, Some(1_000));

        Ok(())
    }

    #[test]
    fn incompressible_payloads_above_threshold_stay_raw() -> TestResult {
        // Gzip cannot shrink a short high-entropy payload; the raw form wins.
        let payload: Vec<u8> = (0..=255).collect();

        let encoded = encode(&payload, 16, None)?;
        assert_eq!(encoded.bytes_saved, 0);

        let (decoded, _) = decode(&encoded.wire)?;
        assert_eq!(decoded, payload);

        Ok(())
    }

    #[test]
    fn future_envelope_versions_are_rejected() -> TestResult {
        let encoded = encode(b"payload", 1024, None)?;

        let mut envelope: serde_json::Value = serde_json::from_slice(&encoded.wire)?;
        if let Some(version) = envelope.get_mut("v") {
            *version = serde_json::json!(99);
        }
        let wire = serde_json::to_vec(&envelope)?;

        assert!(matches!(decode(&wire), Err(CacheError::Decode(_))));

        Ok(())
    }

    #[test]
    fn garbage_wire_data_is_a_decode_error() {
        assert!(matches!(
            decode(b"not json"),
            Err(CacheError::Decode(_))
        ));
    }
}
