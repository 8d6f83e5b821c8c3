use std::fmt;

use bson::Bson;
use bson::raw::RawBsonRef;
use chrono::{SecondsFormat, Utc};

use crate::error::EngineError;
use crate::schema::FieldType;

// ── Sortable scalar encodings ──────────────────────────────────
//
// Numeric values are encoded so that byte-level lexicographic
// comparison matches numeric ordering. Signed integers: XOR the sign
// bit, then big-endian. IEEE 754 doubles: if positive, flip the sign
// bit; if negative, flip all bits.

#[inline]
fn encode_i64_sortable(n: i64) -> [u8; 8] {
    ((n as u64) ^ 0x8000_0000_0000_0000).to_be_bytes()
}

#[inline]
fn decode_i64_sortable(b: [u8; 8]) -> i64 {
    (u64::from_be_bytes(b) ^ 0x8000_0000_0000_0000) as i64
}

#[inline]
fn encode_f64_sortable(f: f64) -> [u8; 8] {
    let bits = f.to_bits();
    let encoded = if (bits & 0x8000_0000_0000_0000) != 0 {
        !bits // negative: flip all bits
    } else {
        bits ^ 0x8000_0000_0000_0000 // positive: flip sign bit
    };
    encoded.to_be_bytes()
}

#[inline]
fn decode_f64_sortable(b: [u8; 8]) -> f64 {
    let encoded = u64::from_be_bytes(b);
    let bits = if (encoded & 0x8000_0000_0000_0000) != 0 {
        encoded ^ 0x8000_0000_0000_0000 // was positive
    } else {
        !encoded // was negative
    };
    f64::from_bits(bits)
}

// ── Type-order tags ─────────────────────────────────────────────

/// Single byte preceding each encoded value, establishing the
/// cross-type order `null < bool < int < double < datetime < string
/// < bytes < array-stub`. Ties within a type break on the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueTag {
    Null = 0x05,
    Bool = 0x10,
    Int = 0x20,
    Double = 0x28,
    DateTime = 0x30,
    String = 0x38,
    Bytes = 0x40,
    ArrayStub = 0x50,
}

impl ValueTag {
    pub fn from_byte(b: u8) -> Option<ValueTag> {
        Some(match b {
            0x05 => Self::Null,
            0x10 => Self::Bool,
            0x20 => Self::Int,
            0x28 => Self::Double,
            0x30 => Self::DateTime,
            0x38 => Self::String,
            0x40 => Self::Bytes,
            0x50 => Self::ArrayStub,
            _ => return None,
        })
    }
}

// ── IndexValue ─────────────────────────────────────────────────

/// A single indexable leaf value.
///
/// `DateTime` holds the canonical RFC-3339 UTC rendering (or the
/// original text when it failed to parse; malformed datetimes are
/// accepted and compared as opaque strings).
#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    DateTime(String),
    String(String),
    Bytes(Vec<u8>),
    ArrayStub,
}

impl IndexValue {
    pub fn tag(&self) -> ValueTag {
        match self {
            Self::Null => ValueTag::Null,
            Self::Bool(_) => ValueTag::Bool,
            Self::Int(_) => ValueTag::Int,
            Self::Double(_) => ValueTag::Double,
            Self::DateTime(_) => ValueTag::DateTime,
            Self::String(_) => ValueTag::String,
            Self::Bytes(_) => ValueTag::Bytes,
            Self::ArrayStub => ValueTag::ArrayStub,
        }
    }

    /// Convert a raw document value to an `IndexValue` under the
    /// schema-declared type. The document is never coerced: a type
    /// disagreement is a `SchemaMismatch`.
    pub fn from_raw(ty: FieldType, raw: RawBsonRef<'_>) -> Result<IndexValue, EngineError> {
        Ok(match (ty, raw) {
            (_, RawBsonRef::Null) => Self::Null,
            (FieldType::Bool, RawBsonRef::Boolean(b)) => Self::Bool(b),
            (FieldType::Int, RawBsonRef::Int32(n)) => Self::Int(n as i64),
            (FieldType::Int, RawBsonRef::Int64(n)) => Self::Int(n),
            (FieldType::Double, RawBsonRef::Double(f)) => Self::Double(f),
            // JSON decoders hand integral doubles over as ints.
            (FieldType::Double, RawBsonRef::Int32(n)) => Self::Double(n as f64),
            (FieldType::Double, RawBsonRef::Int64(n)) => Self::Double(n as f64),
            (FieldType::String, RawBsonRef::String(s)) => Self::String(s.to_string()),
            (FieldType::DateTime, RawBsonRef::String(s)) => Self::DateTime(canonical_datetime(s)),
            (FieldType::DateTime, RawBsonRef::DateTime(dt)) => {
                Self::DateTime(datetime_from_millis(dt.timestamp_millis()))
            }
            (FieldType::Bytes, RawBsonRef::Binary(bin)) => Self::Bytes(bin.bytes.to_vec()),
            (ty, raw) => {
                return Err(EngineError::SchemaMismatch(format!(
                    "expected {ty:?}, found {:?}",
                    raw.element_type()
                )));
            }
        })
    }

    /// Convert a query literal, optionally steered by the schema type
    /// of the field it compares against (datetime fields take RFC-3339
    /// strings). Returns `None` for types the codec does not order.
    pub fn from_bson(ty: Option<FieldType>, value: &Bson) -> Option<IndexValue> {
        Some(match value {
            Bson::Null => Self::Null,
            Bson::Boolean(b) => Self::Bool(*b),
            Bson::Int32(n) => Self::Int(*n as i64),
            Bson::Int64(n) => Self::Int(*n),
            Bson::Double(f) => Self::Double(*f),
            Bson::String(s) if ty == Some(FieldType::DateTime) => {
                Self::DateTime(canonical_datetime(s))
            }
            Bson::String(s) => Self::String(s.clone()),
            Bson::DateTime(dt) => Self::DateTime(datetime_from_millis(dt.timestamp_millis())),
            Bson::Binary(bin) => Self::Bytes(bin.bytes.clone()),
            _ => return None,
        })
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Double(x) => write!(f, "{x}"),
            Self::DateTime(s) | Self::String(s) => write!(f, "{s}"),
            Self::Bytes(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Self::ArrayStub => write!(f, "<array>"),
        }
    }
}

// ── Datetime canonicalization ──────────────────────────────────

/// Canonicalize an RFC-3339 timestamp to UTC with a fixed 9-digit
/// fractional part, so canonical strings order lexicographically.
/// Text that fails to parse is returned unchanged and compares as an
/// opaque string.
pub fn canonical_datetime(s: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(s) {
        Ok(dt) => dt
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Nanos, true),
        Err(_) => s.to_string(),
    }
}

pub fn datetime_from_millis(millis: i64) -> String {
    match chrono::DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Nanos, true),
        None => millis.to_string(),
    }
}

// ── Collation key ──────────────────────────────────────────────

/// Locale-insensitive collation key: transliterated, case-folded
/// primary weights, then `0x01` and the original text as the
/// secondary tie-break, truncated to `max_bytes`.
///
/// Returns the key and whether truncation dropped discriminating
/// bytes (equality queries must then re-check the raw value).
pub fn collation_key(s: &str, max_bytes: usize) -> (Vec<u8>, bool) {
    let mut key = deunicode::deunicode(s).to_lowercase().into_bytes();
    key.push(0x01);
    key.extend_from_slice(s.as_bytes());
    let truncated = key.len() > max_bytes;
    key.truncate(max_bytes);
    (key, truncated)
}

// ── Escaped byte payloads ──────────────────────────────────────
//
// Variable-length payloads embed in composite keys with `0x00`
// escaped to `0x00 0xFF` and a bare `0x00` terminator. Escaping
// preserves lexicographic order.

pub(crate) fn write_escaped(buf: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        buf.push(b);
        if b == 0x00 {
            buf.push(0xff);
        }
    }
    buf.push(0x00);
}

pub(crate) fn read_escaped(bytes: &[u8], mut pos: usize) -> Option<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    loop {
        match *bytes.get(pos)? {
            0x00 => {
                if bytes.get(pos + 1) == Some(&0xff) {
                    out.push(0x00);
                    pos += 2;
                } else {
                    return Some((out, pos + 1));
                }
            }
            b => {
                out.push(b);
                pos += 1;
            }
        }
    }
}

// ── Element codec ──────────────────────────────────────────────

/// Append the order-preserving encoding of `value`:
/// `[type_order_byte][payload]`, where the payload is self-delimiting
/// (fixed width or zero-escape terminated).
///
/// Returns whether a string collation key was truncated.
pub fn write_value(
    buf: &mut Vec<u8>,
    value: &IndexValue,
    string_key_max: usize,
) -> Result<bool, EngineError> {
    let mut truncated = false;
    buf.push(value.tag() as u8);
    match value {
        IndexValue::Null | IndexValue::ArrayStub => {}
        IndexValue::Bool(b) => buf.push(*b as u8),
        IndexValue::Int(n) => buf.extend_from_slice(&encode_i64_sortable(*n)),
        IndexValue::Double(f) => {
            if f.is_nan() {
                return Err(EngineError::Codec("NaN double is not orderable".into()));
            }
            buf.extend_from_slice(&encode_f64_sortable(*f));
        }
        IndexValue::DateTime(s) => write_escaped(buf, s.as_bytes()),
        IndexValue::String(s) => {
            let (key, trunc) = collation_key(s, string_key_max);
            truncated = trunc;
            write_escaped(buf, &key);
        }
        IndexValue::Bytes(b) => write_escaped(buf, b),
    }
    Ok(truncated)
}

/// Decode one element starting at `pos`; returns the value and the
/// position after it.
///
/// String elements decode from the secondary weights of the collation
/// key, so the text may be truncated relative to the original. Good
/// enough for EXPLAIN output and test introspection.
pub fn read_value(bytes: &[u8], pos: usize) -> Option<(IndexValue, usize)> {
    let tag = ValueTag::from_byte(*bytes.get(pos)?)?;
    let pos = pos + 1;
    Some(match tag {
        ValueTag::Null => (IndexValue::Null, pos),
        ValueTag::ArrayStub => (IndexValue::ArrayStub, pos),
        ValueTag::Bool => (IndexValue::Bool(*bytes.get(pos)? != 0), pos + 1),
        ValueTag::Int => {
            let raw: [u8; 8] = bytes.get(pos..pos + 8)?.try_into().ok()?;
            (IndexValue::Int(decode_i64_sortable(raw)), pos + 8)
        }
        ValueTag::Double => {
            let raw: [u8; 8] = bytes.get(pos..pos + 8)?.try_into().ok()?;
            (IndexValue::Double(decode_f64_sortable(raw)), pos + 8)
        }
        ValueTag::DateTime => {
            let (payload, next) = read_escaped(bytes, pos)?;
            (
                IndexValue::DateTime(String::from_utf8(payload).ok()?),
                next,
            )
        }
        ValueTag::String => {
            let (payload, next) = read_escaped(bytes, pos)?;
            let original = match payload.iter().position(|&b| b == 0x01) {
                Some(sep) => payload[sep + 1..].to_vec(),
                None => payload,
            };
            (
                IndexValue::String(String::from_utf8_lossy(&original).into_owned()),
                next,
            )
        }
        ValueTag::Bytes => {
            let (payload, next) = read_escaped(bytes, pos)?;
            (IndexValue::Bytes(payload), next)
        }
    })
}
