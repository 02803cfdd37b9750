//! Dynamic record representation.
//!
//! Records are attribute-name keyed maps of JSON values. Array attributes are
//! JSON arrays in memory; the storage boundary converts them to text.

use crate::model::entity::Entity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Textual record identifier. Integer ids are carried in decimal form.
pub type RecordId = String;

/// One entity row as attribute name -> value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    values: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Builder-style setter.
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(attribute.into(), value.into());
        self
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.values.get(attribute)
    }

    pub fn set(&mut self, attribute: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(attribute.into(), value.into());
    }

    pub fn remove(&mut self, attribute: &str) -> Option<Value> {
        self.values.remove(attribute)
    }

    pub fn contains(&self, attribute: &str) -> bool {
        self.values.contains_key(attribute)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }

    /// Returns this record's id as text, if present and scalar.
    pub fn id_of(&self, entity: &Entity) -> Option<RecordId> {
        self.get(&entity.id_attribute).and_then(id_text)
    }
}

/// Converts a scalar JSON value into its id text form.
///
/// Returns `None` for null, booleans, arrays and objects.
pub fn id_text(value: &Value) -> Option<RecordId> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{id_text, Record};
    use crate::model::entity::{Entity, ScalarType};
    use serde_json::json;

    #[test]
    fn id_of_reads_string_and_integer_ids() {
        let text_entity = Entity::new("study", "study_id", ScalarType::String);
        let int_entity = Entity::new("assay", "assay_id", ScalarType::Int);

        let study = Record::new().with("study_id", "s-1");
        let assay = Record::new().with("assay_id", 42);

        assert_eq!(study.id_of(&text_entity).as_deref(), Some("s-1"));
        assert_eq!(assay.id_of(&int_entity).as_deref(), Some("42"));
    }

    #[test]
    fn id_text_rejects_non_scalar_values() {
        assert_eq!(id_text(&json!(null)), None);
        assert_eq!(id_text(&json!(["a"])), None);
        assert_eq!(id_text(&json!(true)), None);
    }
}
