//! Entity registry built once at startup.
//!
//! # Responsibility
//! - Own every `Entity` descriptor and resolve entities/relations by name.
//! - Validate cross-entity relation wiring before any engine use.
//!
//! # Invariants
//! - A built registry is immutable; engines borrow it.
//! - Every relation targets a registered entity and its key attribute exists
//!   on the storing side with the expected shape.
//! - A declared reverse relation points back to the declaring entity.
//! - Entity, table and attribute names are plain identifiers.

use crate::model::entity::{
    AttributeType, Cardinality, DeletePolicy, Entity, KeysIn, Relation, ScalarType,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid identifier regex"));

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Schema construction and lookup errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Model definition document cannot be parsed.
    InvalidDefinition(String),
    InvalidIdentifier(String),
    DuplicateEntity(String),
    UnknownEntity(String),
    UnknownRelation {
        entity: String,
        relation: String,
    },
    UnknownAttributeType {
        entity: String,
        attribute: String,
        declared: String,
    },
    MissingIdAttribute {
        entity: String,
        attribute: String,
    },
    UnsupportedIdType {
        entity: String,
        declared: AttributeType,
    },
    MissingKeyAttribute {
        entity: String,
        relation: String,
        attribute: String,
    },
    KeyShapeMismatch {
        entity: String,
        relation: String,
        expected: &'static str,
    },
    InvalidReverse {
        entity: String,
        relation: String,
        reverse: String,
    },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDefinition(message) => write!(f, "invalid model definition: {message}"),
            Self::InvalidIdentifier(value) => write!(f, "invalid schema identifier `{value}`"),
            Self::DuplicateEntity(name) => write!(f, "entity already registered: {name}"),
            Self::UnknownEntity(name) => write!(f, "unknown entity: {name}"),
            Self::UnknownRelation { entity, relation } => {
                write!(f, "entity `{entity}` has no relation `{relation}`")
            }
            Self::UnknownAttributeType {
                entity,
                attribute,
                declared,
            } => write!(
                f,
                "entity `{entity}` attribute `{attribute}` has unsupported type `{declared}`"
            ),
            Self::MissingIdAttribute { entity, attribute } => write!(
                f,
                "entity `{entity}` does not declare its id attribute `{attribute}`"
            ),
            Self::UnsupportedIdType { entity, declared } => write!(
                f,
                "entity `{entity}` id attribute must be String or Int, got {declared}"
            ),
            Self::MissingKeyAttribute {
                entity,
                relation,
                attribute,
            } => write!(
                f,
                "relation `{entity}.{relation}` key attribute `{attribute}` is not declared"
            ),
            Self::KeyShapeMismatch {
                entity,
                relation,
                expected,
            } => write!(
                f,
                "relation `{entity}.{relation}` key attribute must be {expected}"
            ),
            Self::InvalidReverse {
                entity,
                relation,
                reverse,
            } => write!(
                f,
                "relation `{entity}.{relation}` has inconsistent reverse `{reverse}`"
            ),
        }
    }
}

impl Error for SchemaError {}

/// Immutable set of entity descriptors.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<String, Entity>,
}

impl EntityRegistry {
    pub fn builder() -> EntityRegistryBuilder {
        EntityRegistryBuilder::default()
    }

    /// Builds a registry from a JSON array of model definitions.
    pub fn from_json(document: &str) -> SchemaResult<Self> {
        let definitions: Vec<ModelDefinition> = serde_json::from_str(document)
            .map_err(|err| SchemaError::InvalidDefinition(err.to_string()))?;

        let mut builder = Self::builder();
        for definition in definitions {
            builder = builder.register(definition.into_entity()?);
        }
        builder.build()
    }

    pub fn entity(&self, name: &str) -> SchemaResult<&Entity> {
        self.entities
            .get(name)
            .ok_or_else(|| SchemaError::UnknownEntity(name.to_string()))
    }

    /// Resolves one relation declared on `entity`.
    pub fn relation(&self, entity: &str, relation: &str) -> SchemaResult<&Relation> {
        self.entity(entity)?
            .relation_named(relation)
            .ok_or_else(|| SchemaError::UnknownRelation {
                entity: entity.to_string(),
                relation: relation.to_string(),
            })
    }

    /// Resolves the mirrored relation on the target side, if declared.
    pub fn reverse_of(&self, entity: &str, relation: &str) -> SchemaResult<Option<&Relation>> {
        let declared = self.relation(entity, relation)?;
        match declared.reverse.as_deref() {
            Some(reverse) => self.relation(&declared.target, reverse).map(Some),
            None => Ok(None),
        }
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Total number of declared relations across all entities.
    pub fn relation_count(&self) -> usize {
        self.entities
            .values()
            .map(|entity| entity.relations().count())
            .sum()
    }
}

/// Collects entities and validates them as one schema.
#[derive(Debug, Default)]
pub struct EntityRegistryBuilder {
    entities: Vec<Entity>,
}

impl EntityRegistryBuilder {
    pub fn register(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    /// Validates the collected entities and freezes them.
    pub fn build(self) -> SchemaResult<EntityRegistry> {
        let mut entities = BTreeMap::new();
        for entity in self.entities {
            validate_entity_shape(&entity)?;
            if entities.contains_key(&entity.name) {
                return Err(SchemaError::DuplicateEntity(entity.name));
            }
            entities.insert(entity.name.clone(), entity);
        }

        let registry = EntityRegistry { entities };
        for entity in registry.entities() {
            for relation in entity.relations() {
                validate_relation(&registry, entity, relation)?;
            }
        }
        Ok(registry)
    }
}

fn validate_entity_shape(entity: &Entity) -> SchemaResult<()> {
    require_identifier(&entity.name)?;
    require_identifier(&entity.storage_name)?;
    for (attribute, _) in entity.attributes() {
        require_identifier(attribute)?;
    }
    for relation in entity.relations() {
        require_identifier(&relation.name)?;
    }

    match entity.attribute_type(&entity.id_attribute) {
        Some(AttributeType::Scalar(ScalarType::String | ScalarType::Int)) => Ok(()),
        Some(declared) => Err(SchemaError::UnsupportedIdType {
            entity: entity.name.clone(),
            declared,
        }),
        None => Err(SchemaError::MissingIdAttribute {
            entity: entity.name.clone(),
            attribute: entity.id_attribute.clone(),
        }),
    }
}

fn validate_relation(
    registry: &EntityRegistry,
    entity: &Entity,
    relation: &Relation,
) -> SchemaResult<()> {
    let target = registry.entity(&relation.target)?;
    let storing = match relation.keys_in {
        KeysIn::Local => entity,
        KeysIn::Foreign => target,
    };

    let key_type = storing
        .attribute_type(&relation.key)
        .ok_or_else(|| SchemaError::MissingKeyAttribute {
            entity: entity.name.clone(),
            relation: relation.name.clone(),
            attribute: relation.key.clone(),
        })?;

    // Only a local to-many side stores an array; every other shape is one scalar key.
    let expect_array = relation.is_local_array();
    if key_type.is_array() != expect_array {
        return Err(SchemaError::KeyShapeMismatch {
            entity: entity.name.clone(),
            relation: relation.name.clone(),
            expected: if expect_array {
                "an array attribute"
            } else {
                "a scalar attribute"
            },
        });
    }

    let Some(reverse_name) = relation.reverse.as_deref() else {
        return Ok(());
    };
    let invalid_reverse = || SchemaError::InvalidReverse {
        entity: entity.name.clone(),
        relation: relation.name.clone(),
        reverse: reverse_name.to_string(),
    };
    let reverse = target
        .relation_named(reverse_name)
        .ok_or_else(invalid_reverse)?;
    if reverse.target != entity.name {
        return Err(invalid_reverse());
    }

    let consistent = match (relation.keys_in, reverse.keys_in) {
        // One stored key seen from both sides.
        (KeysIn::Local, KeysIn::Foreign) | (KeysIn::Foreign, KeysIn::Local) => {
            reverse.key == relation.key && !relation.is_local_array() && !reverse.is_local_array()
        }
        // Mirrored storage: at least one side must be an array.
        (KeysIn::Local, KeysIn::Local) => {
            relation.is_local_array() || reverse.is_local_array()
        }
        (KeysIn::Foreign, KeysIn::Foreign) => false,
    };
    if !consistent {
        return Err(invalid_reverse());
    }
    Ok(())
}

fn require_identifier(value: &str) -> SchemaResult<()> {
    if IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier(value.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ModelDefinition {
    model: String,
    #[serde(default)]
    storage_name: Option<String>,
    id_attribute: String,
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    associations: BTreeMap<String, AssociationDefinition>,
}

#[derive(Debug, Deserialize)]
struct AssociationDefinition {
    #[serde(rename = "type")]
    cardinality: Cardinality,
    target: String,
    keys_in: KeysIn,
    key: String,
    #[serde(default)]
    reverse: Option<String>,
    #[serde(default)]
    on_delete: DeletePolicy,
}

impl ModelDefinition {
    fn into_entity(self) -> SchemaResult<Entity> {
        let mut parsed = BTreeMap::new();
        for (attribute, declared) in self.attributes {
            let kind = AttributeType::parse(&declared).ok_or_else(|| {
                SchemaError::UnknownAttributeType {
                    entity: self.model.clone(),
                    attribute: attribute.clone(),
                    declared: declared.clone(),
                }
            })?;
            parsed.insert(attribute, kind);
        }

        let id_type = match parsed.get(&self.id_attribute) {
            Some(AttributeType::Scalar(kind)) => *kind,
            Some(declared) => {
                return Err(SchemaError::UnsupportedIdType {
                    entity: self.model,
                    declared: *declared,
                })
            }
            None => {
                return Err(SchemaError::MissingIdAttribute {
                    entity: self.model,
                    attribute: self.id_attribute,
                })
            }
        };

        let mut entity = Entity::new(self.model.as_str(), self.id_attribute.as_str(), id_type);
        if let Some(storage_name) = self.storage_name {
            entity = entity.with_storage_name(storage_name);
        }
        for (attribute, kind) in parsed {
            entity = entity.attribute(attribute, kind);
        }
        for (name, association) in self.associations {
            let mut relation = match association.cardinality {
                Cardinality::ToOne => Relation::to_one(
                    name,
                    association.target,
                    association.keys_in,
                    association.key,
                ),
                Cardinality::ToMany => Relation::to_many(
                    name,
                    association.target,
                    association.keys_in,
                    association.key,
                ),
            }
            .with_delete_policy(association.on_delete);
            if let Some(reverse) = association.reverse {
                relation = relation.with_reverse(reverse);
            }
            entity = entity.relation(relation);
        }
        Ok(entity)
    }
}
