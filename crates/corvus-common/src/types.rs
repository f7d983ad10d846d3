//! Column types and typed values for CorvusDB.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Column data types supported by the engine.
///
/// All columns are fixed width: integers and floats occupy four bytes,
/// strings occupy the width declared at table creation, zero padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColType {
    /// 32-bit signed integer, little-endian.
    Int = 0,
    /// 32-bit IEEE float, little-endian.
    Float = 1,
    /// Fixed-width byte string, zero padded to the column length.
    Str = 2,
}

impl ColType {
    /// Returns the on-disk width for this type given the declared column length.
    ///
    /// The declared length is only meaningful for `Str`; numeric types have
    /// a fixed four-byte width.
    pub fn fixed_size(&self, declared_len: usize) -> usize {
        match self {
            ColType::Int | ColType::Float => 4,
            ColType::Str => declared_len,
        }
    }

    /// Returns true if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColType::Int | ColType::Float)
    }

    /// Decodes a type tag from its u8 representation.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ColType::Int),
            1 => Some(ColType::Float),
            2 => Some(ColType::Str),
            _ => None,
        }
    }
}

impl std::fmt::Display for ColType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColType::Int => "INT",
            ColType::Float => "FLOAT",
            ColType::Str => "STRING",
        };
        write!(f, "{}", name)
    }
}

/// A typed value as supplied by an insert or set clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i32),
    Float(f32),
    Str(String),
}

impl Value {
    /// Returns the column type this value carries.
    pub fn col_type(&self) -> ColType {
        match self {
            Value::Int(_) => ColType::Int,
            Value::Float(_) => ColType::Float,
            Value::Str(_) => ColType::Str,
        }
    }

    /// Serializes the value into the fixed column width.
    ///
    /// The byte layout must agree with [`crate::types::ColType`] decoding in
    /// the key comparator: i32/f32 little-endian, strings zero padded.
    /// Strings longer than the column width are truncated to it.
    pub fn to_bytes(&self, col_len: usize) -> Bytes {
        let mut buf = BytesMut::with_capacity(col_len.max(4));
        match self {
            Value::Int(v) => buf.put_i32_le(*v),
            Value::Float(v) => buf.put_f32_le(*v),
            Value::Str(s) => {
                let raw = s.as_bytes();
                let n = raw.len().min(col_len);
                buf.put_slice(&raw[..n]);
                buf.put_bytes(0, col_len - n);
            }
        }
        buf.freeze()
    }

    /// Decodes a value of the given type from a column slice.
    pub fn from_bytes(col_type: ColType, buf: &[u8]) -> Self {
        match col_type {
            ColType::Int => Value::Int(i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
            ColType::Float => Value::Float(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
            ColType::Str => {
                let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
                Value::Str(String::from_utf8_lossy(&buf[..end]).into_owned())
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_size() {
        assert_eq!(ColType::Int.fixed_size(4), 4);
        assert_eq!(ColType::Int.fixed_size(99), 4);
        assert_eq!(ColType::Float.fixed_size(4), 4);
        assert_eq!(ColType::Str.fixed_size(16), 16);
    }

    #[test]
    fn test_is_numeric() {
        assert!(ColType::Int.is_numeric());
        assert!(ColType::Float.is_numeric());
        assert!(!ColType::Str.is_numeric());
    }

    #[test]
    fn test_from_u8() {
        assert_eq!(ColType::from_u8(0), Some(ColType::Int));
        assert_eq!(ColType::from_u8(1), Some(ColType::Float));
        assert_eq!(ColType::from_u8(2), Some(ColType::Str));
        assert_eq!(ColType::from_u8(3), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(ColType::Int.to_string(), "INT");
        assert_eq!(ColType::Float.to_string(), "FLOAT");
        assert_eq!(ColType::Str.to_string(), "STRING");
    }

    #[test]
    fn test_value_col_type() {
        assert_eq!(Value::Int(1).col_type(), ColType::Int);
        assert_eq!(Value::Float(1.5).col_type(), ColType::Float);
        assert_eq!(Value::Str("x".into()).col_type(), ColType::Str);
    }

    #[test]
    fn test_int_roundtrip() {
        for v in [0, 1, -1, i32::MIN, i32::MAX, 123456] {
            let bytes = Value::Int(v).to_bytes(4);
            assert_eq!(bytes.len(), 4);
            assert_eq!(Value::from_bytes(ColType::Int, &bytes), Value::Int(v));
        }
    }

    #[test]
    fn test_float_roundtrip() {
        for v in [0.0f32, -1.5, 3.25, f32::MAX] {
            let bytes = Value::Float(v).to_bytes(4);
            assert_eq!(Value::from_bytes(ColType::Float, &bytes), Value::Float(v));
        }
    }

    #[test]
    fn test_str_zero_padding() {
        let bytes = Value::Str("ab".into()).to_bytes(8);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..2], b"ab");
        assert!(bytes[2..].iter().all(|&b| b == 0));
        assert_eq!(
            Value::from_bytes(ColType::Str, &bytes),
            Value::Str("ab".into())
        );
    }

    #[test]
    fn test_str_truncation() {
        let bytes = Value::Str("abcdefgh".into()).to_bytes(4);
        assert_eq!(bytes.len(), 4);
        assert_eq!(&bytes[..], b"abcd");
    }

    #[test]
    fn test_str_exact_width() {
        let bytes = Value::Str("abcd".into()).to_bytes(4);
        assert_eq!(
            Value::from_bytes(ColType::Str, &bytes),
            Value::Str("abcd".into())
        );
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Int(7).to_string(), "7");
        assert_eq!(Value::Str("hi".into()).to_string(), "hi");
    }
}
