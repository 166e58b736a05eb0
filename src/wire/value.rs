//! Typed-value codec
//!
//! Every value on the wire is `[type_tag(1), length(4 BE), payload(length)]`.
//! The nine type tags cover the primitive types exchanged with the robot;
//! anything else travels as `Custom` opaque bytes.

use crate::error::DecodeError;

/// Raw byte buffer
pub const BYTES_TAG: u8 = 0x01;
/// 16-bit signed integer
pub const SHORT_TAG: u8 = 0x02;
/// 32-bit signed integer
pub const INT_TAG: u8 = 0x03;
/// 64-bit signed integer
pub const LONG_TAG: u8 = 0x04;
/// 32-bit float
pub const FLOAT_TAG: u8 = 0x05;
/// 64-bit float
pub const DOUBLE_TAG: u8 = 0x06;
/// UTF-8 string
pub const STRING_TAG: u8 = 0x07;
/// Boolean (single byte, nonzero = true)
pub const BOOL_TAG: u8 = 0x08;
/// Opaque application-defined payload
pub const CUSTOM_TAG: u8 = 0x09;

/// Maximum declared payload length accepted during decode (1 MiB).
///
/// A peer declaring more than this is either corrupt or hostile; the
/// connection is recycled rather than buffering unbounded data.
pub const MAX_VALUE_LEN: usize = 1024 * 1024;

/// A single typed value exchanged over a topic
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    /// Raw bytes (tag 0x01)
    Bytes(Vec<u8>),
    /// 16-bit signed integer (tag 0x02)
    Short(i16),
    /// 32-bit signed integer (tag 0x03)
    Int(i32),
    /// 64-bit signed integer (tag 0x04)
    Long(i64),
    /// 32-bit float (tag 0x05)
    Float(f32),
    /// 64-bit float (tag 0x06)
    Double(f64),
    /// UTF-8 string (tag 0x07)
    String(String),
    /// Boolean (tag 0x08)
    Bool(bool),
    /// Unrecognized application payload, carried opaquely (tag 0x09)
    Custom(Vec<u8>),
}

impl TypedValue {
    /// Wire type tag for this variant
    pub fn type_tag(&self) -> u8 {
        match self {
            TypedValue::Bytes(_) => BYTES_TAG,
            TypedValue::Short(_) => SHORT_TAG,
            TypedValue::Int(_) => INT_TAG,
            TypedValue::Long(_) => LONG_TAG,
            TypedValue::Float(_) => FLOAT_TAG,
            TypedValue::Double(_) => DOUBLE_TAG,
            TypedValue::String(_) => STRING_TAG,
            TypedValue::Bool(_) => BOOL_TAG,
            TypedValue::Custom(_) => CUSTOM_TAG,
        }
    }

    /// Encode to `[tag, length(4 BE), payload]`
    pub fn encode(&self) -> Vec<u8> {
        let payload: Vec<u8> = match self {
            TypedValue::Bytes(b) => b.clone(),
            TypedValue::Short(v) => v.to_be_bytes().to_vec(),
            TypedValue::Int(v) => v.to_be_bytes().to_vec(),
            TypedValue::Long(v) => v.to_be_bytes().to_vec(),
            TypedValue::Float(v) => v.to_be_bytes().to_vec(),
            TypedValue::Double(v) => v.to_be_bytes().to_vec(),
            TypedValue::String(s) => s.as_bytes().to_vec(),
            TypedValue::Bool(v) => vec![u8::from(*v)],
            TypedValue::Custom(b) => b.clone(),
        };

        let mut out = Vec::with_capacity(5 + payload.len());
        out.push(self.type_tag());
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&payload);
        out
    }

    /// Decode one value from the front of `buf`.
    ///
    /// Returns the value and the total number of bytes consumed
    /// (tag + length prefix + payload). Pure function: `decode(encode(v))`
    /// yields `v` and the encoded length for every representable value.
    pub fn decode(buf: &[u8]) -> Result<(TypedValue, usize), DecodeError> {
        if buf.len() < 5 {
            return Err(DecodeError::Truncated {
                needed: 5,
                available: buf.len(),
            });
        }

        let tag = buf[0];
        let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        if len > MAX_VALUE_LEN {
            return Err(DecodeError::Oversized(len));
        }

        let total = 5 + len;
        if buf.len() < total {
            return Err(DecodeError::Truncated {
                needed: total,
                available: buf.len(),
            });
        }

        let data = &buf[5..total];
        let value = match tag {
            BYTES_TAG => TypedValue::Bytes(data.to_vec()),
            SHORT_TAG => TypedValue::Short(i16::from_be_bytes(fixed(tag, data)?)),
            INT_TAG => TypedValue::Int(i32::from_be_bytes(fixed(tag, data)?)),
            LONG_TAG => TypedValue::Long(i64::from_be_bytes(fixed(tag, data)?)),
            FLOAT_TAG => TypedValue::Float(f32::from_be_bytes(fixed(tag, data)?)),
            DOUBLE_TAG => TypedValue::Double(f64::from_be_bytes(fixed(tag, data)?)),
            STRING_TAG => TypedValue::String(
                std::str::from_utf8(data)
                    .map_err(|_| DecodeError::InvalidUtf8("string value"))?
                    .to_string(),
            ),
            BOOL_TAG => {
                let byte: [u8; 1] = fixed(tag, data)?;
                TypedValue::Bool(byte[0] != 0)
            }
            CUSTOM_TAG => TypedValue::Custom(data.to_vec()),
            other => return Err(DecodeError::UnknownType(other)),
        };

        Ok((value, total))
    }

    /// Total encoded size of a value whose header starts at `buf`, if the
    /// 5-byte prefix is readable. Used by the stream decoder to skip over
    /// values it cannot interpret.
    pub(crate) fn declared_size(buf: &[u8]) -> Option<usize> {
        if buf.len() < 5 {
            return None;
        }
        let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        Some(5 + len)
    }
}

/// Copy a fixed-width payload, rejecting values whose declared length does
/// not match the type's width.
fn fixed<const N: usize>(tag: u8, data: &[u8]) -> Result<[u8; N], DecodeError> {
    if data.len() != N {
        return Err(DecodeError::LengthMismatch {
            tag,
            expected: N,
            actual: data.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(data);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: TypedValue) {
        let bytes = v.encode();
        let (decoded, consumed) = TypedValue::decode(&bytes).unwrap();
        assert_eq!(decoded, v);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_round_trip_all_variants() {
        round_trip(TypedValue::Bytes(vec![]));
        round_trip(TypedValue::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]));
        round_trip(TypedValue::Short(0));
        round_trip(TypedValue::Short(-1));
        round_trip(TypedValue::Short(i16::MIN));
        round_trip(TypedValue::Short(i16::MAX));
        round_trip(TypedValue::Int(i32::MIN));
        round_trip(TypedValue::Int(i32::MAX));
        round_trip(TypedValue::Long(i64::MIN));
        round_trip(TypedValue::Long(i64::MAX));
        round_trip(TypedValue::Float(-0.5));
        round_trip(TypedValue::Double(1234.5678));
        round_trip(TypedValue::String(String::new()));
        round_trip(TypedValue::String("a".repeat(4095)));
        round_trip(TypedValue::String("/gamepad1/leftX".to_string()));
        round_trip(TypedValue::Bool(true));
        round_trip(TypedValue::Bool(false));
        round_trip(TypedValue::Custom(vec![1, 2, 3]));
    }

    #[test]
    fn test_encoding_layout() {
        // Double: tag 0x06, length 8, big-endian payload
        let bytes = TypedValue::Double(1.0).encode();
        assert_eq!(bytes[0], DOUBLE_TAG);
        assert_eq!(&bytes[1..5], &8u32.to_be_bytes());
        assert_eq!(&bytes[5..], &1.0f64.to_be_bytes());

        let bytes = TypedValue::Bool(true).encode();
        assert_eq!(bytes, vec![BOOL_TAG, 0, 0, 0, 1, 1]);
    }

    #[test]
    fn test_decode_truncated() {
        let mut bytes = TypedValue::Int(42).encode();
        bytes.pop();
        match TypedValue::decode(&bytes) {
            Err(DecodeError::Truncated { needed: 9, available: 8 }) => {}
            other => panic!("expected Truncated, got {:?}", other),
        }

        // Shorter than the 5-byte prefix
        assert!(matches!(
            TypedValue::decode(&[INT_TAG, 0]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_decode_unknown_tag() {
        let bytes = [0x0A, 0, 0, 0, 1, 0xFF];
        assert_eq!(
            TypedValue::decode(&bytes),
            Err(DecodeError::UnknownType(0x0A))
        );
        let bytes = [0x00, 0, 0, 0, 0];
        assert_eq!(
            TypedValue::decode(&bytes),
            Err(DecodeError::UnknownType(0x00))
        );
    }

    #[test]
    fn test_decode_length_mismatch() {
        // Short declared with 3 payload bytes
        let bytes = [SHORT_TAG, 0, 0, 0, 3, 1, 2, 3];
        assert_eq!(
            TypedValue::decode(&bytes),
            Err(DecodeError::LengthMismatch {
                tag: SHORT_TAG,
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn test_decode_oversized() {
        let mut bytes = vec![BYTES_TAG];
        bytes.extend_from_slice(&(MAX_VALUE_LEN as u32 + 1).to_be_bytes());
        assert!(matches!(
            TypedValue::decode(&bytes),
            Err(DecodeError::Oversized(_))
        ));
    }

    #[test]
    fn test_bool_nonzero_is_true() {
        let bytes = [BOOL_TAG, 0, 0, 0, 1, 0x42];
        let (v, _) = TypedValue::decode(&bytes).unwrap();
        assert_eq!(v, TypedValue::Bool(true));
    }

    #[test]
    fn test_decode_trailing_bytes_ignored() {
        let mut bytes = TypedValue::Short(7).encode();
        let len = bytes.len();
        bytes.extend_from_slice(&[0xFF, 0xFF]);
        let (v, consumed) = TypedValue::decode(&bytes).unwrap();
        assert_eq!(v, TypedValue::Short(7));
        assert_eq!(consumed, len);
    }
}
