//! Array attribute storage boundary.
//!
//! # Responsibility
//! - Convert in-memory JSON arrays to the persisted JSON-text column form and back.
//! - Provide set algebra over foreign-key id lists.
//!
//! # Invariants
//! - This is the only place array columns are parsed or serialized.
//! - `NULL`, empty text and JSON `null` all read back as an empty array.
//! - Id lists produced here never contain duplicates.
//! - Written id arrays hold strings only.

use crate::model::record::{id_text, RecordId};
use serde_json::Value;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Persisted array text could not be decoded, or a value is not an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayColumnError {
    pub message: String,
}

impl Display for ArrayColumnError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid array column value: {}", self.message)
    }
}

impl Error for ArrayColumnError {}

/// Serializes an in-memory array value into column text.
///
/// `null` stays `None` so the column is stored as SQL `NULL`.
pub fn encode_array_column(value: &Value) -> Result<Option<String>, ArrayColumnError> {
    match value {
        Value::Null => Ok(None),
        Value::Array(_) => Ok(Some(value.to_string())),
        other => Err(ArrayColumnError {
            message: format!("expected JSON array, got `{other}`"),
        }),
    }
}

/// Parses column text back into an in-memory JSON array.
pub fn decode_array_column(raw: Option<&str>) -> Result<Value, ArrayColumnError> {
    let Some(text) = raw.map(str::trim).filter(|text| !text.is_empty()) else {
        return Ok(Value::Array(Vec::new()));
    };

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Null) => Ok(Value::Array(Vec::new())),
        Ok(parsed @ Value::Array(_)) => Ok(parsed),
        Ok(other) => Err(ArrayColumnError {
            message: format!("expected JSON array text, got `{other}`"),
        }),
        Err(err) => Err(ArrayColumnError {
            message: err.to_string(),
        }),
    }
}

/// Extracts foreign-key ids from an in-memory array value.
///
/// Non-scalar elements are skipped; duplicates keep their first position.
pub fn ids_from_value(value: Option<&Value>) -> Vec<RecordId> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    dedup_preserving_order(items.iter().filter_map(id_text))
}

/// Builds the in-memory array value for a foreign-key id list.
///
/// Ids are always written as strings, also for `Int` targets.
pub fn ids_to_value(ids: &[RecordId]) -> Value {
    Value::Array(ids.iter().cloned().map(Value::String).collect())
}

/// Set union keeping `current` order and appending unseen `added` ids.
pub fn union_ids(current: &[RecordId], added: &[RecordId]) -> Vec<RecordId> {
    dedup_preserving_order(current.iter().chain(added.iter()).cloned())
}

/// Set difference keeping `current` order.
pub fn difference_ids(current: &[RecordId], removed: &[RecordId]) -> Vec<RecordId> {
    let removed: BTreeSet<&str> = removed.iter().map(String::as_str).collect();
    dedup_preserving_order(
        current
            .iter()
            .filter(|id| !removed.contains(id.as_str()))
            .cloned(),
    )
}

fn dedup_preserving_order(ids: impl Iterator<Item = RecordId>) -> Vec<RecordId> {
    let mut seen = BTreeSet::new();
    let mut unique = Vec::new();
    for id in ids {
        if seen.insert(id.clone()) {
            unique.push(id);
        }
    }
    unique
}
