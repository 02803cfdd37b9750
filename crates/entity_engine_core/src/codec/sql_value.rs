//! JSON <-> SQLite value conversion for typed attributes.
//!
//! # Invariants
//! - Booleans are stored as `0`/`1` integers.
//! - Date and date-time values are stored as text as given.
//! - Array attributes go through `codec::fk_array` and are stored as text.

use crate::codec::fk_array::{decode_array_column, encode_array_column};
use crate::model::entity::{AttributeType, ScalarType};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Number, Value};

/// Coerces one JSON value into the storage form of `kind`.
///
/// Strings holding numbers/booleans are accepted for numeric/boolean types,
/// so comma-split search values and cursor fields can be bound directly.
pub fn scalar_to_sql(kind: ScalarType, value: &Value) -> Result<SqlValue, String> {
    match (kind, value) {
        (_, Value::Null) => Ok(SqlValue::Null),
        (ScalarType::String | ScalarType::Date | ScalarType::DateTime, Value::String(text)) => {
            Ok(SqlValue::Text(text.clone()))
        }
        (ScalarType::String, Value::Number(number)) => Ok(SqlValue::Text(number.to_string())),
        (ScalarType::Int, Value::Number(number)) => number
            .as_i64()
            .map(SqlValue::Integer)
            .ok_or_else(|| format!("`{number}` is not an integer")),
        (ScalarType::Int, Value::String(text)) => text
            .trim()
            .parse::<i64>()
            .map(SqlValue::Integer)
            .map_err(|_| format!("`{text}` is not an integer")),
        (ScalarType::Float, Value::Number(number)) => number
            .as_f64()
            .map(SqlValue::Real)
            .ok_or_else(|| format!("`{number}` is not a float")),
        (ScalarType::Float, Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .map(SqlValue::Real)
            .map_err(|_| format!("`{text}` is not a float")),
        (ScalarType::Boolean, Value::Bool(flag)) => Ok(SqlValue::Integer(i64::from(*flag))),
        (ScalarType::Boolean, Value::String(text)) => match text.trim() {
            "true" => Ok(SqlValue::Integer(1)),
            "false" => Ok(SqlValue::Integer(0)),
            other => Err(format!("`{other}` is not a boolean")),
        },
        (kind, other) => Err(format!("`{other}` is not a valid {}", kind.as_str())),
    }
}

/// Converts one attribute value into its column value.
pub fn attribute_to_sql(kind: AttributeType, value: &Value) -> Result<SqlValue, String> {
    match kind {
        AttributeType::Scalar(scalar) => scalar_to_sql(scalar, value),
        AttributeType::Array(_) => encode_array_column(value)
            .map(|text| text.map_or(SqlValue::Null, SqlValue::Text))
            .map_err(|err| err.to_string()),
    }
}

/// Converts one column value read from storage into its attribute value.
pub fn attribute_from_sql(kind: AttributeType, raw: ValueRef<'_>) -> Result<Value, String> {
    match kind {
        AttributeType::Array(_) => match raw {
            ValueRef::Null => decode_array_column(None).map_err(|err| err.to_string()),
            ValueRef::Text(bytes) => {
                let text = std::str::from_utf8(bytes).map_err(|err| err.to_string())?;
                decode_array_column(Some(text)).map_err(|err| err.to_string())
            }
            other => Err(format!("array column holds {:?}", other.data_type())),
        },
        AttributeType::Scalar(scalar) => scalar_from_sql(scalar, raw),
    }
}

fn scalar_from_sql(kind: ScalarType, raw: ValueRef<'_>) -> Result<Value, String> {
    match (kind, raw) {
        (_, ValueRef::Null) => Ok(Value::Null),
        (ScalarType::Boolean, ValueRef::Integer(flag)) => Ok(Value::Bool(flag != 0)),
        (ScalarType::Int, ValueRef::Integer(number)) => Ok(Value::from(number)),
        (ScalarType::Float, ValueRef::Real(number)) => Ok(Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        (ScalarType::Float, ValueRef::Integer(number)) => Ok(Value::from(number as f64)),
        (
            ScalarType::String | ScalarType::Date | ScalarType::DateTime,
            ValueRef::Text(bytes),
        ) => std::str::from_utf8(bytes)
            .map(|text| Value::String(text.to_string()))
            .map_err(|err| err.to_string()),
        (ScalarType::String, ValueRef::Integer(number)) => Ok(Value::String(number.to_string())),
        (kind, other) => Err(format!(
            "{} column holds {:?}",
            kind.as_str(),
            other.data_type()
        )),
    }
}
