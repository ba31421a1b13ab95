//! Scalar payload encoding
//!
//! Numeric encodings are order preserving: comparing encoded bytes gives the
//! same result as comparing the values, which keeps index entries and set
//! items sorted by value.
//!
//! | Kind  | Bytes                                              |
//! |-------|----------------------------------------------------|
//! | bool  | 1 byte, 0 or 1                                     |
//! | int   | 8 bytes BE, sign bit flipped                       |
//! | uint  | 8 bytes BE                                         |
//! | float | 8 bytes BE, negatives inverted, positives sign flipped |
//! | text  | UTF-8                                              |
//! | bytes | raw                                                |
//! | enum  | 4 bytes BE                                         |

use super::{encode_exact, ByteSink};
use crate::definition::ScalarKind;
use crate::error::{Error, Result};
use crate::value::Value;
use byteorder::{BigEndian, ByteOrder};

const SIGN_BIT: u64 = 1 << 63;

/// Encoded length of a scalar
pub fn scalar_len(value: &Value) -> Result<usize> {
    match value {
        Value::Bool(_) => Ok(1),
        Value::Int(_) | Value::UInt(_) | Value::Float(_) => Ok(8),
        Value::Enum(_) => Ok(4),
        Value::Text(s) => Ok(s.len()),
        Value::Bytes(b) => Ok(b.len()),
        other => Err(not_scalar(other)),
    }
}

/// Write a scalar payload
pub fn write_scalar(value: &Value, sink: &mut dyn ByteSink) -> Result<()> {
    let mut word = [0u8; 8];
    match value {
        Value::Bool(b) => sink.put_u8(u8::from(*b)),
        Value::Int(i) => {
            BigEndian::write_u64(&mut word, (*i as u64) ^ SIGN_BIT);
            sink.put(&word);
        }
        Value::UInt(u) => {
            BigEndian::write_u64(&mut word, *u);
            sink.put(&word);
        }
        Value::Float(f) => {
            BigEndian::write_u64(&mut word, sortable_float_bits(*f));
            sink.put(&word);
        }
        Value::Enum(e) => {
            let mut short = [0u8; 4];
            BigEndian::write_u32(&mut short, *e);
            sink.put(&short);
        }
        Value::Text(s) => sink.put(s.as_bytes()),
        Value::Bytes(b) => sink.put(b),
        other => return Err(not_scalar(other)),
    }
    Ok(())
}

/// Encode a scalar into its own buffer
pub fn scalar_bytes(value: &Value) -> Result<Vec<u8>> {
    encode_exact(|sink| write_scalar(value, sink))
}

/// Decode a scalar occupying all of `bytes`
pub fn read_scalar(kind: ScalarKind, bytes: &[u8]) -> Result<Value> {
    let fixed = |n: usize| {
        if bytes.len() == n {
            Ok(())
        } else {
            Err(Error::Decode(format!(
                "{} needs {n} bytes, got {}",
                kind.name(),
                bytes.len()
            )))
        }
    };
    match kind {
        ScalarKind::Bool => {
            fixed(1)?;
            match bytes[0] {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                b => Err(Error::Decode(format!("invalid bool byte {b:#04x}"))),
            }
        }
        ScalarKind::Int => {
            fixed(8)?;
            Ok(Value::Int((BigEndian::read_u64(bytes) ^ SIGN_BIT) as i64))
        }
        ScalarKind::UInt => {
            fixed(8)?;
            Ok(Value::UInt(BigEndian::read_u64(bytes)))
        }
        ScalarKind::Float => {
            fixed(8)?;
            Ok(Value::Float(float_from_sortable(BigEndian::read_u64(bytes))))
        }
        ScalarKind::Enum { .. } => {
            fixed(4)?;
            Ok(Value::Enum(BigEndian::read_u32(bytes)))
        }
        ScalarKind::Text => std::str::from_utf8(bytes)
            .map(|s| Value::Text(s.to_string()))
            .map_err(|e| Error::Decode(format!("invalid UTF-8 text: {e}"))),
        ScalarKind::Bytes => Ok(Value::Bytes(bytes.to_vec())),
    }
}

/// Fail unless `value` has kind `kind`
pub fn check_kind(kind: ScalarKind, value: &Value) -> Result<()> {
    if kind.matches(value) {
        Ok(())
    } else {
        Err(Error::TypeMismatch {
            expected: kind.name().to_string(),
            actual: value.kind_name().to_string(),
        })
    }
}

fn sortable_float_bits(f: f64) -> u64 {
    let bits = f.to_bits();
    if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits ^ SIGN_BIT
    }
}

fn float_from_sortable(bits: u64) -> f64 {
    if bits & SIGN_BIT != 0 {
        f64::from_bits(bits ^ SIGN_BIT)
    } else {
        f64::from_bits(!bits)
    }
}

fn not_scalar(value: &Value) -> Error {
    Error::TypeMismatch {
        expected: "scalar".to_string(),
        actual: value.kind_name().to_string(),
    }
}
