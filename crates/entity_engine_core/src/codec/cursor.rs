//! Opaque pagination cursor codec.
//!
//! # Responsibility
//! - Encode one record's declared attributes as a base64 JSON token.
//! - Decode tokens back into record-shaped maps without a storage round-trip.
//!
//! # Invariants
//! - Only attributes declared on the entity are encoded; absent ones encode as `null`.
//! - Tokens carry no signature. A cursor is a position, not a capability.
//! - Decode failures are client input errors, never panics.

use crate::model::entity::Entity;
use crate::model::record::Record;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

// Bound for untrusted cursor token input.
const MAX_CURSOR_TOKEN_LEN: usize = 16 * 1024;

pub type CursorResult<T> = Result<T, CursorError>;

/// Cursor token decode failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    Empty,
    TooLong { len: usize, max: usize },
    InvalidBase64(String),
    InvalidJson(String),
    NotAnObject,
}

impl Display for CursorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "cursor token is empty"),
            Self::TooLong { len, max } => {
                write!(f, "cursor token exceeds max length: {len} chars (max {max})")
            }
            Self::InvalidBase64(message) => write!(f, "cursor token is not base64: {message}"),
            Self::InvalidJson(message) => write!(f, "cursor payload is not JSON: {message}"),
            Self::NotAnObject => write!(f, "cursor payload is not a JSON object"),
        }
    }
}

impl Error for CursorError {}

/// Encodes `record` as an opaque cursor token for `entity`.
pub fn encode_cursor(entity: &Entity, record: &Record) -> String {
    let mut payload = Map::new();
    for (attribute, _) in entity.attributes() {
        let value = record.get(attribute).cloned().unwrap_or(Value::Null);
        payload.insert(attribute.to_string(), value);
    }
    STANDARD.encode(Value::Object(payload).to_string())
}

/// Decodes a cursor token into the record-shaped map it was built from.
///
/// Surrounding whitespace is trimmed.
pub fn decode_cursor(token: &str) -> CursorResult<Record> {
    let token = token.trim();
    if token.is_empty() {
        return Err(CursorError::Empty);
    }
    if token.len() > MAX_CURSOR_TOKEN_LEN {
        return Err(CursorError::TooLong {
            len: token.len(),
            max: MAX_CURSOR_TOKEN_LEN,
        });
    }

    let bytes = STANDARD
        .decode(token)
        .map_err(|err| CursorError::InvalidBase64(err.to_string()))?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(values)) => Ok(Record::from_map(values)),
        Ok(_) => Err(CursorError::NotAnObject),
        Err(err) => Err(CursorError::InvalidJson(err.to_string())),
    }
}
