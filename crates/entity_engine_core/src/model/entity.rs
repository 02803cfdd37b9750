//! Entity and relation descriptors.
//!
//! # Responsibility
//! - Describe record shapes (id attribute, typed attributes) for dynamic entities.
//! - Describe relations and which participant stores their foreign keys.
//!
//! # Invariants
//! - Descriptors are immutable once registered in an `EntityRegistry`.
//! - The id attribute is always part of the attribute map.
//!
//! # See also
//! - `model::registry` for cross-entity validation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Scalar value type of one attribute (or of array elements).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    String,
    Int,
    Float,
    Boolean,
    Date,
    DateTime,
}

impl ScalarType {
    /// Stable declaration name used by JSON model definitions.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::Boolean => "Boolean",
            Self::Date => "Date",
            Self::DateTime => "DateTime",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "String" => Some(Self::String),
            "Int" => Some(Self::Int),
            "Float" => Some(Self::Float),
            "Boolean" => Some(Self::Boolean),
            "Date" => Some(Self::Date),
            "DateTime" => Some(Self::DateTime),
            _ => None,
        }
    }
}

/// Declared attribute type: one scalar, or an array of scalars.
///
/// Arrays are persisted as JSON text; see `codec::fk_array`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    Scalar(ScalarType),
    Array(ScalarType),
}

impl AttributeType {
    /// Parses `Type` or `[Type]` declaration strings.
    pub fn parse(declaration: &str) -> Option<Self> {
        let trimmed = declaration.trim();
        match trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        {
            Some(inner) => ScalarType::parse(inner).map(Self::Array),
            None => ScalarType::parse(trimmed).map(Self::Scalar),
        }
    }

    /// Element type for arrays, own type for scalars.
    pub fn scalar(self) -> ScalarType {
        match self {
            Self::Scalar(value) | Self::Array(value) => value,
        }
    }

    pub fn is_array(self) -> bool {
        matches!(self, Self::Array(_))
    }
}

impl Display for AttributeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(value) => write!(f, "{}", value.as_str()),
            Self::Array(value) => write!(f, "[{}]", value.as_str()),
        }
    }
}

/// Relation cardinality as seen from the declaring entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    ToOne,
    ToMany,
}

/// Which participant stores the relation key attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeysIn {
    /// The key attribute lives on the declaring entity.
    Local,
    /// The key attribute lives on the target entity and holds declaring ids.
    Foreign,
}

/// Behavior of the deletion guard for one relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Associated records block deletion.
    #[default]
    Reject,
    /// Associations are not counted; the pre-delete hook may clear them.
    Update,
}

/// One association between the declaring entity and `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Relation name, unique per declaring entity.
    pub name: String,
    pub cardinality: Cardinality,
    /// Target entity name.
    pub target: String,
    pub keys_in: KeysIn,
    /// Key attribute name on the storing side.
    pub key: String,
    /// Mirrored relation name declared on the target entity.
    pub reverse: Option<String>,
    pub on_delete: DeletePolicy,
}

impl Relation {
    pub fn to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        keys_in: KeysIn,
        key: impl Into<String>,
    ) -> Self {
        Self::new(name, Cardinality::ToOne, target, keys_in, key)
    }

    pub fn to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        keys_in: KeysIn,
        key: impl Into<String>,
    ) -> Self {
        Self::new(name, Cardinality::ToMany, target, keys_in, key)
    }

    fn new(
        name: impl Into<String>,
        cardinality: Cardinality,
        target: impl Into<String>,
        keys_in: KeysIn,
        key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cardinality,
            target: target.into(),
            keys_in,
            key: key.into(),
            reverse: None,
            on_delete: DeletePolicy::default(),
        }
    }

    /// Sets the mirrored relation name on the target entity.
    pub fn with_reverse(mut self, reverse: impl Into<String>) -> Self {
        self.reverse = Some(reverse.into());
        self
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.on_delete = policy;
        self
    }

    /// Returns whether this side stores a foreign-key array.
    pub fn is_local_array(&self) -> bool {
        self.cardinality == Cardinality::ToMany && self.keys_in == KeysIn::Local
    }
}

/// Named record type with typed attributes and a relation table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Schema-level entity name.
    pub name: String,
    /// Storage table name. Defaults to `name`.
    pub storage_name: String,
    /// Primary identifier attribute.
    pub id_attribute: String,
    attributes: BTreeMap<String, AttributeType>,
    relations: BTreeMap<String, Relation>,
}

impl Entity {
    /// Creates an entity whose id attribute has type `id_type`.
    pub fn new(
        name: impl Into<String>,
        id_attribute: impl Into<String>,
        id_type: ScalarType,
    ) -> Self {
        let name = name.into();
        let id_attribute = id_attribute.into();
        let mut attributes = BTreeMap::new();
        attributes.insert(id_attribute.clone(), AttributeType::Scalar(id_type));
        Self {
            storage_name: name.clone(),
            name,
            id_attribute,
            attributes,
            relations: BTreeMap::new(),
        }
    }

    pub fn with_storage_name(mut self, storage_name: impl Into<String>) -> Self {
        self.storage_name = storage_name.into();
        self
    }

    /// Declares one attribute. Redeclaring replaces the previous type.
    pub fn attribute(mut self, name: impl Into<String>, kind: AttributeType) -> Self {
        self.attributes.insert(name.into(), kind);
        self
    }

    /// Declares one relation. Redeclaring replaces the previous relation.
    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.insert(relation.name.clone(), relation);
        self
    }

    pub fn attribute_type(&self, name: &str) -> Option<AttributeType> {
        self.attributes.get(name).copied()
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Declared attributes in stable name order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, AttributeType)> {
        self.attributes
            .iter()
            .map(|(name, kind)| (name.as_str(), *kind))
    }

    pub fn relation_named(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    /// Scalar type of the id attribute.
    pub fn id_type(&self) -> ScalarType {
        self.attribute_type(&self.id_attribute)
            .map_or(ScalarType::String, AttributeType::scalar)
    }
}
