//! Tnetstring codec.
//!
//! A tnetstring is a length-prefixed, type-tagged, self-delimiting value:
//! `<decimal-length>":"<payload><type-tag>`. Mongrel2 uses the format for the
//! request headers blob, the request body, and filter option payloads. The
//! decoder is total for well-formed input and reports a precise
//! [`TNetstringError`] otherwise.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Longest accepted run of length digits. Matches the reference format
/// specification, which caps payloads below 1 GB.
const MAX_LENGTH_DIGITS: usize = 9;

/// A decoded tnetstring value.
///
/// Dictionaries preserve insertion order; a duplicated key keeps its first
/// position but takes the last value seen.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// `,`: an opaque byte string.
    Str(Bytes),
    /// `#`: a decimal integer.
    Int(i128),
    /// `^`: a floating point number.
    Float(f64),
    /// `!`: `true` or `false`.
    Bool(bool),
    /// `~`: null; the payload must be empty.
    Null,
    /// `]`: a sequence of values.
    List(Vec<Value>),
    /// `}`: string-keyed pairs, insertion-ordered.
    Dict(Vec<(String, Value)>),
}

impl Value {
    /// Borrow the byte payload when this value is a string.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Str(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Borrow the dictionary entries when this value is a dictionary.
    #[must_use]
    pub fn as_dict(&self) -> Option<&[(String, Value)]> {
        match self {
            Self::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// One-word tag name used in error messages and logs.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Bool(_) => "boolean",
            Self::Null => "null",
            Self::List(_) => "list",
            Self::Dict(_) => "dictionary",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.type_name()) }
}

/// Errors raised while decoding a tnetstring.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TNetstringError {
    /// The length prefix is empty, non-numeric, or longer than nine digits.
    #[error("malformed length prefix")]
    MalformedLength,

    /// No `:` terminator was found after the length prefix.
    #[error("length prefix is not terminated by ':'")]
    UnterminatedLength,

    /// The input ends before the payload and type tag claimed by the prefix.
    #[error("truncated value: need {need} bytes after ':', have {have}")]
    Truncated {
        /// Bytes required by the length prefix, including the type tag.
        need: usize,
        /// Bytes actually available.
        have: usize,
    },

    /// The trailing type tag is not one of `,#^!~]}`.
    #[error("unknown type tag {tag:#04x}")]
    UnknownTag {
        /// The unrecognised tag byte.
        tag: u8,
    },

    /// An integer payload is not a valid decimal number in `i128` range.
    #[error("invalid integer payload")]
    InvalidInteger,

    /// A float payload does not parse as a decimal floating point number.
    #[error("invalid float payload")]
    InvalidFloat,

    /// A boolean payload is neither `true` nor `false`.
    #[error("invalid boolean payload")]
    InvalidBoolean,

    /// A null payload carries trailing garbage.
    #[error("null payload must be empty")]
    NonEmptyNull,

    /// A dictionary key decoded to something other than a string.
    #[error("dictionary key is a {found}, not a string")]
    NonStringKey {
        /// Tag name of the offending key value.
        found: &'static str,
    },

    /// A dictionary key is not valid UTF-8.
    #[error("dictionary key is not valid UTF-8")]
    InvalidKeyEncoding,

    /// A dictionary payload ended after a key with no paired value.
    #[error("dictionary key {key:?} has no value")]
    MissingDictValue {
        /// The unpaired key.
        key: String,
    },
}

/// Decode one tnetstring from the front of `input`.
///
/// Returns the decoded value and the remainder of the input following it.
///
/// # Errors
///
/// Returns a [`TNetstringError`] describing the first malformation found:
/// a bad length prefix, a missing `:`, truncation, an unknown type tag, or a
/// payload that does not match its tag.
///
/// # Examples
///
/// ```
/// use mongrel2_handler::tnetstring::{decode, Value};
///
/// let (value, rest) = decode(b"5:hello,").expect("well-formed tnetstring");
/// assert_eq!(value, Value::Str("hello".into()));
/// assert!(rest.is_empty());
/// ```
pub fn decode(input: &[u8]) -> Result<(Value, &[u8]), TNetstringError> {
    let colon = input
        .iter()
        .position(|&b| b == b':')
        .ok_or(TNetstringError::UnterminatedLength)?;
    let digits = &input[..colon];
    if digits.is_empty()
        || digits.len() > MAX_LENGTH_DIGITS
        || !digits.iter().all(u8::is_ascii_digit)
    {
        return Err(TNetstringError::MalformedLength);
    }
    // Nine ASCII digits always fit in usize.
    let len: usize = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(TNetstringError::MalformedLength)?;

    let body = &input[colon + 1..];
    if body.len() < len + 1 {
        return Err(TNetstringError::Truncated {
            need: len + 1,
            have: body.len(),
        });
    }
    let payload = &body[..len];
    let tag = body[len];
    let rest = &body[len + 1..];

    let value = match tag {
        b',' => Value::Str(Bytes::copy_from_slice(payload)),
        b'#' => decode_int(payload)?,
        b'^' => decode_float(payload)?,
        b'!' => match payload {
            b"true" => Value::Bool(true),
            b"false" => Value::Bool(false),
            _ => return Err(TNetstringError::InvalidBoolean),
        },
        b'~' => {
            if !payload.is_empty() {
                return Err(TNetstringError::NonEmptyNull);
            }
            Value::Null
        }
        b']' => decode_list(payload)?,
        b'}' => decode_dict(payload)?,
        other => return Err(TNetstringError::UnknownTag { tag: other }),
    };
    Ok((value, rest))
}

fn decode_int(payload: &[u8]) -> Result<Value, TNetstringError> {
    std::str::from_utf8(payload)
        .ok()
        .and_then(|s| s.parse::<i128>().ok())
        .map(Value::Int)
        .ok_or(TNetstringError::InvalidInteger)
}

fn decode_float(payload: &[u8]) -> Result<Value, TNetstringError> {
    std::str::from_utf8(payload)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .map(Value::Float)
        .ok_or(TNetstringError::InvalidFloat)
}

fn decode_list(mut payload: &[u8]) -> Result<Value, TNetstringError> {
    let mut items = Vec::new();
    while !payload.is_empty() {
        let (item, rest) = decode(payload)?;
        items.push(item);
        payload = rest;
    }
    Ok(Value::List(items))
}

fn decode_dict(mut payload: &[u8]) -> Result<Value, TNetstringError> {
    let mut entries: Vec<(String, Value)> = Vec::new();
    while !payload.is_empty() {
        let (key, rest) = decode(payload)?;
        let key_bytes = match key {
            Value::Str(bytes) => bytes,
            other => {
                return Err(TNetstringError::NonStringKey {
                    found: other.type_name(),
                })
            }
        };
        let key = std::str::from_utf8(&key_bytes)
            .map_err(|_| TNetstringError::InvalidKeyEncoding)?
            .to_owned();
        if rest.is_empty() {
            return Err(TNetstringError::MissingDictValue { key });
        }
        let (value, rest) = decode(rest)?;
        // Duplicate keys keep their first position; the last value wins.
        match entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key, value)),
        }
        payload = rest;
    }
    Ok(Value::Dict(entries))
}

/// Encode `value` as a standalone tnetstring.
///
/// # Examples
///
/// ```
/// use mongrel2_handler::tnetstring::{encode, Value};
///
/// assert_eq!(encode(&Value::Int(42)), b"2:42#");
/// ```
#[must_use]
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_into(value, &mut buf);
    buf.to_vec()
}

/// Encode `value`, appending the bytes to `dst`.
pub fn encode_into(value: &Value, dst: &mut BytesMut) {
    match value {
        Value::Str(bytes) => write_field(dst, bytes, b','),
        Value::Int(n) => write_field(dst, n.to_string().as_bytes(), b'#'),
        Value::Float(f) => write_field(dst, f.to_string().as_bytes(), b'^'),
        Value::Bool(b) => write_field(dst, if *b { b"true" } else { b"false" }, b'!'),
        Value::Null => write_field(dst, b"", b'~'),
        Value::List(items) => {
            let mut inner = BytesMut::new();
            for item in items {
                encode_into(item, &mut inner);
            }
            write_field(dst, &inner, b']');
        }
        Value::Dict(entries) => {
            let mut inner = BytesMut::new();
            for (key, value) in entries {
                write_field(&mut inner, key.as_bytes(), b',');
                encode_into(value, &mut inner);
            }
            write_field(dst, &inner, b'}');
        }
    }
}

fn write_field(dst: &mut BytesMut, payload: &[u8], tag: u8) {
    dst.extend_from_slice(payload.len().to_string().as_bytes());
    dst.put_u8(b':');
    dst.extend_from_slice(payload);
    dst.put_u8(tag);
}

#[cfg(test)]
mod tests;
