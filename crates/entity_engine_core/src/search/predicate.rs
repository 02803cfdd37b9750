//! Search expression to SQL predicate translation.
//!
//! # Responsibility
//! - Define the recursively composable `SearchExpression` accepted by readers.
//! - Translate expressions into a parameterized `StoragePredicate`.
//!
//! # Invariants
//! - Every referenced field must be declared on the entity; unknown fields fail
//!   with `SearchError::UnknownField` instead of being ignored.
//! - Values are always bound as parameters, never spliced into SQL text.
//! - Translation is side-effect free.

use crate::codec::sql_value::scalar_to_sql;
use crate::model::entity::{AttributeType, Entity, ScalarType};
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type SearchResult<T> = Result<T, SearchError>;

/// Search translation errors. All of them are client input errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    UnknownField {
        entity: String,
        field: String,
    },
    InvalidOperator {
        field: String,
        operator: Operator,
        message: String,
    },
    InvalidValue {
        field: String,
        message: String,
    },
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownField { entity, field } => {
                write!(f, "entity `{entity}` has no searchable field `{field}`")
            }
            Self::InvalidOperator {
                field,
                operator,
                message,
            } => write!(
                f,
                "operator `{}` cannot be applied to `{field}`: {message}",
                operator.as_str()
            ),
            Self::InvalidValue { field, message } => {
                write!(f, "invalid search value for `{field}`: {message}")
            }
        }
    }
}

impl Error for SearchError {}

/// Leaf comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
    In,
    NotIn,
    Between,
    /// Array attribute contains the given element.
    Contains,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Like => "like",
            Self::NotLike => "not_like",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Between => "between",
            Self::Contains => "contains",
        }
    }

    fn comparison_sql(self) -> Option<&'static str> {
        match self {
            Self::Eq => Some("="),
            Self::Ne => Some("<>"),
            Self::Lt => Some("<"),
            Self::Lte => Some("<="),
            Self::Gt => Some(">"),
            Self::Gte => Some(">="),
            Self::Like => Some("LIKE"),
            Self::NotLike => Some("NOT LIKE"),
            _ => None,
        }
    }
}

/// How a leaf value should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    Scalar,
    /// Strings are split on `,` into a list.
    Array,
}

/// Recursive search expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchExpression {
    Leaf {
        field: String,
        operator: Operator,
        #[serde(default)]
        value: Value,
        #[serde(default)]
        value_type: ValueType,
    },
    And(Vec<SearchExpression>),
    Or(Vec<SearchExpression>),
    Not(Box<SearchExpression>),
}

impl SearchExpression {
    pub fn leaf(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::Leaf {
            field: field.into(),
            operator,
            value: value.into(),
            value_type: ValueType::Scalar,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::Eq, value)
    }

    /// `in` leaf over a list or comma-joined string.
    pub fn one_of(field: impl Into<String>, values: impl Into<Value>) -> Self {
        Self::Leaf {
            field: field.into(),
            operator: Operator::In,
            value: values.into(),
            value_type: ValueType::Array,
        }
    }

    /// Conjunction, flattening nested `and` nodes.
    pub fn and(self, other: SearchExpression) -> Self {
        let mut parts = match self {
            Self::And(parts) => parts,
            single => vec![single],
        };
        match other {
            Self::And(more) => parts.extend(more),
            single => parts.push(single),
        }
        Self::And(parts)
    }

    /// Combines an optional caller search with an internal scoping expression.
    pub fn scoped(search: Option<&SearchExpression>, scope: SearchExpression) -> Self {
        match search {
            Some(search) => search.clone().and(scope),
            None => scope,
        }
    }

    /// Rows of `target` whose `key` attribute points at `id`: `contains` for
    /// an array key, equality otherwise.
    pub fn references(target: &Entity, key: &str, id: &str) -> Self {
        match target.attribute_type(key) {
            Some(AttributeType::Array(_)) => Self::leaf(key, Operator::Contains, id),
            _ => Self::eq(key, id),
        }
    }
}

/// Parameterized SQL boolean fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct StoragePredicate {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl StoragePredicate {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Predicate matching every row.
    pub fn always() -> Self {
        Self::new("1 = 1", Vec::new())
    }

    /// Predicate matching no row.
    pub fn never() -> Self {
        Self::new("1 = 0", Vec::new())
    }

    pub fn and(self, other: StoragePredicate) -> Self {
        Self::join(vec![self, other], "AND", Self::always)
    }

    pub fn or(self, other: StoragePredicate) -> Self {
        Self::join(vec![self, other], "OR", Self::never)
    }

    pub fn negate(self) -> Self {
        Self::new(format!("NOT ({})", self.sql), self.params)
    }

    fn join(parts: Vec<StoragePredicate>, glue: &str, empty: fn() -> Self) -> Self {
        if parts.is_empty() {
            return empty();
        }
        let mut sql = Vec::with_capacity(parts.len());
        let mut params = Vec::new();
        for part in parts {
            sql.push(format!("({})", part.sql));
            params.extend(part.params);
        }
        Self::new(sql.join(&format!(" {glue} ")), params)
    }
}

/// Translates `search` into a storage predicate over `entity`'s table.
pub fn translate(search: &SearchExpression, entity: &Entity) -> SearchResult<StoragePredicate> {
    match search {
        SearchExpression::And(parts) => Ok(StoragePredicate::join(
            translate_all(parts, entity)?,
            "AND",
            StoragePredicate::always,
        )),
        SearchExpression::Or(parts) => Ok(StoragePredicate::join(
            translate_all(parts, entity)?,
            "OR",
            StoragePredicate::never,
        )),
        SearchExpression::Not(inner) => Ok(translate(inner, entity)?.negate()),
        SearchExpression::Leaf {
            field,
            operator,
            value,
            value_type,
        } => translate_leaf(entity, field, *operator, value, *value_type),
    }
}

/// Quotes one schema identifier for SQL text.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn translate_all(parts: &[SearchExpression], entity: &Entity) -> SearchResult<Vec<StoragePredicate>> {
    parts.iter().map(|part| translate(part, entity)).collect()
}

fn translate_leaf(
    entity: &Entity,
    field: &str,
    operator: Operator,
    value: &Value,
    value_type: ValueType,
) -> SearchResult<StoragePredicate> {
    let kind = entity
        .attribute_type(field)
        .ok_or_else(|| SearchError::UnknownField {
            entity: entity.name.clone(),
            field: field.to_string(),
        })?;
    let column = quote_ident(field);

    if let AttributeType::Array(element) = kind {
        return match (operator, value) {
            (Operator::Contains, _) => Ok(StoragePredicate::new(
                format!(
                    "EXISTS (SELECT 1 FROM json_each({column}) \
                     WHERE CAST(json_each.value AS TEXT) = CAST(? AS TEXT))"
                ),
                vec![bind(field, element, value)?],
            )),
            (Operator::Eq, Value::Null) => Ok(StoragePredicate::new(
                format!("({column} IS NULL OR {column} = '[]')"),
                Vec::new(),
            )),
            (Operator::Ne, Value::Null) => Ok(StoragePredicate::new(
                format!("({column} IS NOT NULL AND {column} <> '[]')"),
                Vec::new(),
            )),
            _ => Err(SearchError::InvalidOperator {
                field: field.to_string(),
                operator,
                message: "array attributes support `contains` and null checks only".to_string(),
            }),
        };
    }

    let scalar = kind.scalar();
    match operator {
        Operator::Eq if value.is_null() => {
            Ok(StoragePredicate::new(format!("{column} IS NULL"), Vec::new()))
        }
        Operator::Ne if value.is_null() => Ok(StoragePredicate::new(
            format!("{column} IS NOT NULL"),
            Vec::new(),
        )),
        Operator::Contains => Err(SearchError::InvalidOperator {
            field: field.to_string(),
            operator,
            message: "`contains` requires an array attribute".to_string(),
        }),
        Operator::In | Operator::NotIn => {
            let items = list_items(field, value, value_type)?;
            if items.is_empty() {
                return Ok(if operator == Operator::In {
                    StoragePredicate::never()
                } else {
                    StoragePredicate::always()
                });
            }
            let params = items
                .iter()
                .map(|item| bind(field, scalar, item))
                .collect::<SearchResult<Vec<_>>>()?;
            let placeholders = vec!["?"; params.len()].join(", ");
            let keyword = if operator == Operator::In {
                "IN"
            } else {
                "NOT IN"
            };
            Ok(StoragePredicate::new(
                format!("{column} {keyword} ({placeholders})"),
                params,
            ))
        }
        Operator::Between => {
            let items = list_items(field, value, ValueType::Array)?;
            let [low, high] = items.as_slice() else {
                return Err(SearchError::InvalidValue {
                    field: field.to_string(),
                    message: format!("`between` expects two values, got {}", items.len()),
                });
            };
            Ok(StoragePredicate::new(
                format!("{column} BETWEEN ? AND ?"),
                vec![bind(field, scalar, low)?, bind(field, scalar, high)?],
            ))
        }
        comparison => {
            let Some(sql_operator) = comparison.comparison_sql() else {
                return Err(SearchError::InvalidOperator {
                    field: field.to_string(),
                    operator,
                    message: "unsupported operator".to_string(),
                });
            };
            if value.is_null() {
                return Err(SearchError::InvalidValue {
                    field: field.to_string(),
                    message: format!("`{}` requires a non-null value", operator.as_str()),
                });
            }
            Ok(StoragePredicate::new(
                format!("{column} {sql_operator} ?"),
                vec![bind(field, scalar, value)?],
            ))
        }
    }
}

fn bind(field: &str, kind: ScalarType, value: &Value) -> SearchResult<SqlValue> {
    scalar_to_sql(kind, value).map_err(|message| SearchError::InvalidValue {
        field: field.to_string(),
        message,
    })
}

fn list_items(field: &str, value: &Value, value_type: ValueType) -> SearchResult<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::String(text) if value_type == ValueType::Array || text.contains(',') => Ok(text
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| Value::String(item.to_string()))
            .collect()),
        Value::Null => Err(SearchError::InvalidValue {
            field: field.to_string(),
            message: "expected a list value".to_string(),
        }),
        single => Ok(vec![single.clone()]),
    }
}
