//! Binary envelope framing.
//!
//! ```text
//! [kind:1][timestamp:8][payload_length:4][payload:payload_length]   Segments
//! [kind:1][timestamp:8][value:4]                                     Metric
//! ```
//!
//! All integers are big-endian. Both layouts share the 13-byte fixed header
//! size, so anything shorter is rejected before the kind is looked at.

use crate::error::CodecError;
use crate::types::{EnvelopeKind, ResultEnvelope};
use byteorder::{BigEndian, ByteOrder};

pub const HEADER_LEN: usize = 13;
const METRIC_LEN: usize = 4;

pub fn encode(envelope: &ResultEnvelope) -> Result<Vec<u8>, CodecError> {
    let payload = &envelope.payload;
    let mut buf = vec![0u8; HEADER_LEN];
    buf[0] = envelope.kind.as_byte();
    BigEndian::write_u64(&mut buf[1..9], envelope.timestamp);

    match envelope.kind {
        EnvelopeKind::Segments => {
            let len = u32::try_from(payload.len())
                .map_err(|_| CodecError::PayloadTooLarge(payload.len()))?;
            BigEndian::write_u32(&mut buf[9..13], len);
            buf.extend_from_slice(payload);
        }
        EnvelopeKind::Metric => {
            if payload.len() != METRIC_LEN {
                return Err(CodecError::MetricSize(payload.len()));
            }
            buf[9..13].copy_from_slice(payload);
        }
    }
    Ok(buf)
}

/// Decode one envelope from the front of `buf`, returning it together with
/// the number of bytes it occupied. Trailing bytes are left untouched.
pub fn decode_frame(buf: &[u8]) -> Result<(ResultEnvelope, usize), CodecError> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            expected: HEADER_LEN,
            actual: buf.len(),
        });
    }
    let kind = EnvelopeKind::from_byte(buf[0]).ok_or(CodecError::UnknownKind(buf[0]))?;
    let timestamp = BigEndian::read_u64(&buf[1..9]);

    match kind {
        EnvelopeKind::Segments => {
            let declared = BigEndian::read_u32(&buf[9..13]) as usize;
            let available = buf.len() - HEADER_LEN;
            if declared > available {
                return Err(CodecError::LengthOverrun {
                    declared,
                    available,
                });
            }
            let payload = buf[HEADER_LEN..HEADER_LEN + declared].to_vec();
            Ok((
                ResultEnvelope {
                    kind,
                    timestamp,
                    payload,
                },
                HEADER_LEN + declared,
            ))
        }
        EnvelopeKind::Metric => Ok((
            ResultEnvelope {
                kind,
                timestamp,
                payload: buf[9..13].to_vec(),
            },
            HEADER_LEN,
        )),
    }
}

pub fn decode(buf: &[u8]) -> Result<ResultEnvelope, CodecError> {
    decode_frame(buf).map(|(envelope, _)| envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_segments_layout() {
        let env = ResultEnvelope::segments(0x0102030405060708, b"hi".to_vec());
        let bytes = encode(&env).unwrap();
        assert_eq!(
            bytes,
            vec![0x01, 1, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 2, b'h', b'i']
        );
    }

    #[test]
    fn test_codec_segments_roundtrip() {
        let env = ResultEnvelope::segments(1_700_000_000_123_456_789, br#"[{"text":"cq cq"}]"#.to_vec());
        let bytes = encode(&env).unwrap();
        assert_eq!(decode(&bytes).unwrap(), env);
    }

    #[test]
    fn test_codec_empty_payload_roundtrip() {
        let env = ResultEnvelope::segments(42, Vec::new());
        let bytes = encode(&env).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(decode(&bytes).unwrap(), env);
    }

    #[test]
    fn test_codec_metric_has_no_length_prefix() {
        let env = ResultEnvelope::metric(7, -12.5);
        let bytes = encode(&env).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[9..13], &(-12.5f32).to_be_bytes());
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.metric_value(), Some(-12.5));
        assert_eq!(decoded.timestamp, 7);
    }

    #[test]
    fn test_codec_metric_wrong_payload_size() {
        let env = ResultEnvelope {
            kind: EnvelopeKind::Metric,
            timestamp: 0,
            payload: vec![0; 8],
        };
        assert_eq!(encode(&env), Err(CodecError::MetricSize(8)));
    }

    #[test]
    fn test_codec_rejects_short_frame() {
        let result = decode(&[0x01, 0, 0, 0]);
        assert_eq!(
            result,
            Err(CodecError::Truncated {
                expected: HEADER_LEN,
                actual: 4
            })
        );
    }

    #[test]
    fn test_codec_rejects_unknown_kind() {
        let mut bytes = encode(&ResultEnvelope::segments(1, vec![1])).unwrap();
        bytes[0] = 0x7f;
        assert_eq!(decode(&bytes), Err(CodecError::UnknownKind(0x7f)));
    }

    #[test]
    fn test_codec_rejects_length_overrun() {
        let mut bytes = encode(&ResultEnvelope::segments(1, vec![9; 4])).unwrap();
        bytes.truncate(HEADER_LEN + 2);
        assert_eq!(
            decode(&bytes),
            Err(CodecError::LengthOverrun {
                declared: 4,
                available: 2
            })
        );
    }

    #[test]
    fn test_codec_stops_at_declared_length() {
        let first = ResultEnvelope::segments(1, b"abc".to_vec());
        let second = ResultEnvelope::metric(2, 1.0);
        let mut bytes = encode(&first).unwrap();
        bytes.extend(encode(&second).unwrap());

        let (decoded, used) = decode_frame(&bytes).unwrap();
        assert_eq!(decoded, first);
        assert_eq!(used, HEADER_LEN + 3);
        assert_eq!(decode(&bytes[used..]).unwrap(), second);
    }
}
