//! Field type tags and decoded scalar values.
//!
//! Every message field on either wire protocol is one of a small set of
//! little-endian primitive types. [`FieldType`] tags a field in a schema;
//! [`FieldValue`] is the decoded runtime value delivered to subscribers.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// FieldType
// ---------------------------------------------------------------------------

/// Wire type of a single message field.
///
/// All multi-byte types are little-endian on both protocols. [`FieldType::Bytes`]
/// is the catch-all used for payloads of messages absent from the dialect
/// dictionary; it consumes the remainder of the payload.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 64-bit integer.
    U64,
    /// IEEE-754 single-precision float.
    F32,
    /// Raw bytes, consuming the rest of the payload.
    Bytes,
}

impl FieldType {
    /// Number of payload bytes this type occupies, or `0` for the
    /// variable-length [`FieldType::Bytes`].
    pub fn wire_size(self) -> usize {
        match self {
            FieldType::U8 | FieldType::I8 => 1,
            FieldType::U16 | FieldType::I16 => 2,
            FieldType::U32 | FieldType::I32 | FieldType::F32 => 4,
            FieldType::U64 => 8,
            FieldType::Bytes => 0,
        }
    }

    /// Decode one value of this type from the front of `bytes`.
    ///
    /// Returns `None` when `bytes` is shorter than [`wire_size`](Self::wire_size).
    /// `Bytes` always succeeds and consumes everything.
    pub fn decode(self, bytes: &[u8]) -> Option<FieldValue> {
        let take = |n: usize| bytes.get(..n);
        Some(match self {
            FieldType::U8 => FieldValue::U8(*bytes.first()?),
            FieldType::I8 => FieldValue::I8(*bytes.first()? as i8),
            FieldType::U16 => FieldValue::U16(u16::from_le_bytes(take(2)?.try_into().ok()?)),
            FieldType::I16 => FieldValue::I16(i16::from_le_bytes(take(2)?.try_into().ok()?)),
            FieldType::U32 => FieldValue::U32(u32::from_le_bytes(take(4)?.try_into().ok()?)),
            FieldType::I32 => FieldValue::I32(i32::from_le_bytes(take(4)?.try_into().ok()?)),
            FieldType::U64 => FieldValue::U64(u64::from_le_bytes(take(8)?.try_into().ok()?)),
            FieldType::F32 => FieldValue::F32(f32::from_le_bytes(take(4)?.try_into().ok()?)),
            FieldType::Bytes => FieldValue::Bytes(bytes.to_vec()),
        })
    }
}

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// A decoded field value.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    /// Unsigned 8-bit integer.
    U8(u8),
    /// Signed 8-bit integer.
    I8(i8),
    /// Unsigned 16-bit integer.
    U16(u16),
    /// Signed 16-bit integer.
    I16(i16),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Signed 32-bit integer.
    I32(i32),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// Single-precision float.
    F32(f32),
    /// Raw undecoded bytes.
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Numeric view of the value, for plotting and rate displays.
    ///
    /// Returns `None` for [`FieldValue::Bytes`].
    pub fn as_f64(&self) -> Option<f64> {
        Some(match self {
            FieldValue::U8(v) => f64::from(*v),
            FieldValue::I8(v) => f64::from(*v),
            FieldValue::U16(v) => f64::from(*v),
            FieldValue::I16(v) => f64::from(*v),
            FieldValue::U32(v) => f64::from(*v),
            FieldValue::I32(v) => f64::from(*v),
            FieldValue::U64(v) => *v as f64,
            FieldValue::F32(v) => f64::from(*v),
            FieldValue::Bytes(_) => return None,
        })
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::U8(v) => write!(f, "{v}"),
            FieldValue::I8(v) => write!(f, "{v}"),
            FieldValue::U16(v) => write!(f, "{v}"),
            FieldValue::I16(v) => write!(f, "{v}"),
            FieldValue::U32(v) => write!(f, "{v}"),
            FieldValue::I32(v) => write!(f, "{v}"),
            FieldValue::U64(v) => write!(f, "{v}"),
            FieldValue::F32(v) => write!(f, "{v}"),
            FieldValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Ordered name → value mapping for one decoded message.
///
/// Order matches the declaring schema exactly; a `Vec` of pairs keeps it
/// without the overhead of an ordered map.
pub type FieldMap = Vec<(&'static str, FieldValue)>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_sizes() {
        assert_eq!(FieldType::U8.wire_size(), 1);
        assert_eq!(FieldType::I16.wire_size(), 2);
        assert_eq!(FieldType::F32.wire_size(), 4);
        assert_eq!(FieldType::U64.wire_size(), 8);
        assert_eq!(FieldType::Bytes.wire_size(), 0);
    }

    #[test]
    fn decode_little_endian() {
        assert_eq!(
            FieldType::U16.decode(&[0x34, 0x12]),
            Some(FieldValue::U16(0x1234))
        );
        assert_eq!(
            FieldType::I32.decode(&[0xFF, 0xFF, 0xFF, 0xFF]),
            Some(FieldValue::I32(-1))
        );
        assert_eq!(
            FieldType::F32.decode(&1.5f32.to_le_bytes()),
            Some(FieldValue::F32(1.5))
        );
    }

    #[test]
    fn decode_short_input() {
        assert_eq!(FieldType::U32.decode(&[1, 2]), None);
        assert_eq!(FieldType::U8.decode(&[]), None);
    }

    #[test]
    fn decode_bytes_consumes_rest() {
        assert_eq!(
            FieldType::Bytes.decode(&[1, 2, 3]),
            Some(FieldValue::Bytes(vec![1, 2, 3]))
        );
    }

    #[test]
    fn numeric_view() {
        assert_eq!(FieldValue::I16(-7).as_f64(), Some(-7.0));
        assert_eq!(FieldValue::Bytes(vec![0]).as_f64(), None);
    }

    #[test]
    fn serialize_untagged() {
        let json = serde_json::to_string(&FieldValue::F32(2.5)).unwrap();
        assert_eq!(json, "2.5");
        let json = serde_json::to_string(&FieldValue::U16(42)).unwrap();
        assert_eq!(json, "42");
    }
}
