//! Record repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide entity-generic CRUD, predicate scans and single-row attribute
//!   updates over the per-entity tables.
//! - Keep SQL text and column conversion inside the persistence boundary.
//!
//! # Invariants
//! - Only attributes declared on the entity reach SQL; anything else is
//!   `RepoError::UnknownAttribute`.
//! - Every single-row write is one statement; no cross-row transactions.
//! - Read paths reject undecodable persisted values instead of masking them.
//!
//! # See also
//! - `codec::sql_value` for the column value mapping.

use crate::codec::sql_value::{attribute_from_sql, attribute_to_sql, scalar_to_sql};
use crate::db::DbError;
use crate::model::entity::{AttributeType, Entity, ScalarType};
use crate::model::record::{id_text, Record, RecordId};
use crate::search::predicate::{quote_ident, StoragePredicate};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for record persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound {
        entity: String,
        id: RecordId,
    },
    UnknownAttribute {
        entity: String,
        attribute: String,
    },
    /// Caller-supplied value cannot be stored in the attribute's column.
    InvalidValue {
        entity: String,
        attribute: String,
        message: String,
    },
    /// Persisted value cannot be decoded.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::UnknownAttribute { entity, attribute } => {
                write!(f, "entity `{entity}` has no attribute `{attribute}`")
            }
            Self::InvalidValue {
                entity,
                attribute,
                message,
            } => write!(f, "invalid value for `{entity}.{attribute}`: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted record data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::NotFound { .. }
            | Self::UnknownAttribute { .. }
            | Self::InvalidValue { .. }
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn reversed(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }

    fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One `ORDER BY` term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderField {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Bounded predicate scan.
#[derive(Debug, Clone)]
pub struct ScanRequest<'a> {
    pub filter: &'a StoragePredicate,
    pub order: &'a [OrderField],
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Repository interface for entity-generic record storage.
pub trait RecordRepository {
    fn get_record(&self, entity: &Entity, id: &str) -> RepoResult<Option<Record>>;
    /// Inserts `record`, generating an id when it carries none.
    fn insert_record(&self, entity: &Entity, record: &Record) -> RepoResult<RecordId>;
    /// Writes the attributes present in `changes`; absent ones are untouched.
    fn update_record(&self, entity: &Entity, id: &str, changes: &Record) -> RepoResult<()>;
    fn delete_record(&self, entity: &Entity, id: &str) -> RepoResult<()>;
    fn scan(&self, entity: &Entity, request: &ScanRequest<'_>) -> RepoResult<Vec<Record>>;
    fn count(&self, entity: &Entity, filter: &StoragePredicate) -> RepoResult<u64>;
    fn exists(&self, entity: &Entity, filter: &StoragePredicate) -> RepoResult<bool>;
    /// Unconditional single-row write. Returns rows affected (0 or 1).
    fn set_attribute(
        &self,
        entity: &Entity,
        id: &str,
        attribute: &str,
        value: &Value,
    ) -> RepoResult<usize>;
    /// Sets `attribute` to NULL only while it still equals `expected`.
    /// Returns rows affected (0 or 1).
    fn clear_attribute_if(
        &self,
        entity: &Entity,
        id: &str,
        attribute: &str,
        expected: &Value,
    ) -> RepoResult<usize>;
    /// Returns the subset of `ids` with no stored row, in input order.
    fn missing_ids(&self, entity: &Entity, ids: &[RecordId]) -> RepoResult<Vec<RecordId>>;
}

/// SQLite-backed record repository.
pub struct SqliteRecordRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRecordRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn get_record(&self, entity: &Entity, id: &str) -> RepoResult<Option<Record>> {
        let Some(id_value) = id_param(entity, id) else {
            return Ok(None);
        };
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE {} = ?1;",
            select_sql(entity),
            quote_ident(&entity.id_attribute)
        ))?;

        let mut rows = stmt.query([id_value])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_record_row(entity, row)?));
        }

        Ok(None)
    }

    fn insert_record(&self, entity: &Entity, record: &Record) -> RepoResult<RecordId> {
        let mut columns = Vec::new();
        let mut bind_values = Vec::new();
        let mut generated_id = None;

        let supplied_id = record
            .get(&entity.id_attribute)
            .filter(|value| !value.is_null());
        if supplied_id.is_none() && entity.id_type() == ScalarType::String {
            let id = Uuid::new_v4().to_string();
            columns.push(quote_ident(&entity.id_attribute));
            bind_values.push(SqlValue::Text(id.clone()));
            generated_id = Some(id);
        }

        for (attribute, value) in record.iter() {
            if attribute == &entity.id_attribute && supplied_id.is_none() {
                continue;
            }
            columns.push(quote_ident(attribute));
            bind_values.push(column_value(entity, attribute, value)?);
        }

        let sql = if columns.is_empty() {
            format!(
                "INSERT INTO {} DEFAULT VALUES;",
                quote_ident(&entity.storage_name)
            )
        } else {
            let placeholders = vec!["?"; columns.len()].join(", ");
            format!(
                "INSERT INTO {} ({}) VALUES ({placeholders});",
                quote_ident(&entity.storage_name),
                columns.join(", ")
            )
        };
        self.conn.execute(&sql, params_from_iter(bind_values))?;

        if let Some(id) = generated_id {
            return Ok(id);
        }
        match supplied_id.and_then(id_text) {
            Some(id) => Ok(id),
            None => Ok(self.conn.last_insert_rowid().to_string()),
        }
    }

    fn update_record(&self, entity: &Entity, id: &str, changes: &Record) -> RepoResult<()> {
        let mut assignments = Vec::new();
        let mut bind_values = Vec::new();
        for (attribute, value) in changes.iter() {
            if attribute == &entity.id_attribute {
                continue;
            }
            assignments.push(format!("{} = ?", quote_ident(attribute)));
            bind_values.push(column_value(entity, attribute, value)?);
        }

        let Some(id_value) = id_param(entity, id) else {
            return Err(not_found(entity, id));
        };

        if assignments.is_empty() {
            if self.get_record(entity, id)?.is_none() {
                return Err(not_found(entity, id));
            }
            return Ok(());
        }

        bind_values.push(id_value);
        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET {} WHERE {} = ?;",
                quote_ident(&entity.storage_name),
                assignments.join(", "),
                quote_ident(&entity.id_attribute)
            ),
            params_from_iter(bind_values),
        )?;

        if changed == 0 {
            return Err(not_found(entity, id));
        }

        Ok(())
    }

    fn delete_record(&self, entity: &Entity, id: &str) -> RepoResult<()> {
        let Some(id_value) = id_param(entity, id) else {
            return Err(not_found(entity, id));
        };
        let changed = self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1;",
                quote_ident(&entity.storage_name),
                quote_ident(&entity.id_attribute)
            ),
            [id_value],
        )?;

        if changed == 0 {
            return Err(not_found(entity, id));
        }

        Ok(())
    }

    fn scan(&self, entity: &Entity, request: &ScanRequest<'_>) -> RepoResult<Vec<Record>> {
        let mut sql = format!("{} WHERE {}", select_sql(entity), request.filter.sql);
        let mut bind_values = request.filter.params.clone();

        if !request.order.is_empty() {
            let mut terms = Vec::with_capacity(request.order.len());
            for term in request.order {
                require_attribute(entity, &term.field)?;
                terms.push(format!(
                    "{} {}",
                    quote_ident(&term.field),
                    term.direction.as_sql()
                ));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        if let Some(limit) = request.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(SqlValue::Integer(i64::from(limit)));
            if request.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(SqlValue::Integer(i64::from(request.offset)));
            }
        } else if request.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(SqlValue::Integer(i64::from(request.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut records = Vec::new();

        while let Some(row) = rows.next()? {
            records.push(parse_record_row(entity, row)?);
        }

        Ok(records)
    }

    fn count(&self, entity: &Entity, filter: &StoragePredicate) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {};",
                quote_ident(&entity.storage_name),
                filter.sql
            ),
            params_from_iter(filter.params.iter()),
            |row| row.get(0),
        )?;
        u64::try_from(count).map_err(|_| RepoError::InvalidData(format!("negative count {count}")))
    }

    fn exists(&self, entity: &Entity, filter: &StoragePredicate) -> RepoResult<bool> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT 1 FROM {} WHERE {} LIMIT 1;",
            quote_ident(&entity.storage_name),
            filter.sql
        ))?;
        let mut rows = stmt.query(params_from_iter(filter.params.iter()))?;
        Ok(rows.next()?.is_some())
    }

    fn set_attribute(
        &self,
        entity: &Entity,
        id: &str,
        attribute: &str,
        value: &Value,
    ) -> RepoResult<usize> {
        let column = column_value(entity, attribute, value)?;
        let Some(id_value) = id_param(entity, id) else {
            return Ok(0);
        };
        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET {} = ?1 WHERE {} = ?2;",
                quote_ident(&entity.storage_name),
                quote_ident(attribute),
                quote_ident(&entity.id_attribute)
            ),
            [column, id_value],
        )?;
        Ok(changed)
    }

    fn clear_attribute_if(
        &self,
        entity: &Entity,
        id: &str,
        attribute: &str,
        expected: &Value,
    ) -> RepoResult<usize> {
        let expected = column_value(entity, attribute, expected)?;
        let Some(id_value) = id_param(entity, id) else {
            return Ok(0);
        };
        let column = quote_ident(attribute);
        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET {column} = NULL WHERE {} = ?1 AND {column} = ?2;",
                quote_ident(&entity.storage_name),
                quote_ident(&entity.id_attribute)
            ),
            [id_value, expected],
        )?;
        Ok(changed)
    }

    fn missing_ids(&self, entity: &Entity, ids: &[RecordId]) -> RepoResult<Vec<RecordId>> {
        let mut candidates = Vec::new();
        let mut bind_values = Vec::new();
        for id in ids {
            if let Some(value) = id_param(entity, id) {
                candidates.push("?");
                bind_values.push(value);
            }
        }

        let mut found = BTreeSet::new();
        if !candidates.is_empty() {
            let id_column = quote_ident(&entity.id_attribute);
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {id_column} FROM {} WHERE {id_column} IN ({});",
                quote_ident(&entity.storage_name),
                candidates.join(", ")
            ))?;
            let mut rows = stmt.query(params_from_iter(bind_values))?;
            while let Some(row) = rows.next()? {
                let value = attribute_from_sql(
                    AttributeType::Scalar(entity.id_type()),
                    row.get_ref(0)?,
                )
                .map_err(RepoError::InvalidData)?;
                if let Some(id) = id_text(&value) {
                    found.insert(id);
                }
            }
        }

        let mut missing = Vec::new();
        for id in ids {
            if !found.contains(id) && !missing.contains(id) {
                missing.push(id.clone());
            }
        }
        Ok(missing)
    }
}

fn select_sql(entity: &Entity) -> String {
    let columns = entity
        .attributes()
        .map(|(attribute, _)| quote_ident(attribute))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT {columns} FROM {}",
        quote_ident(&entity.storage_name)
    )
}

fn parse_record_row(entity: &Entity, row: &Row<'_>) -> RepoResult<Record> {
    let mut record = Record::new();
    for (index, (attribute, kind)) in entity.attributes().enumerate() {
        let value = attribute_from_sql(kind, row.get_ref(index)?).map_err(|message| {
            RepoError::InvalidData(format!(
                "{}.{attribute}: {message}",
                entity.storage_name
            ))
        })?;
        record.set(attribute, value);
    }
    Ok(record)
}

fn require_attribute(entity: &Entity, attribute: &str) -> RepoResult<AttributeType> {
    entity
        .attribute_type(attribute)
        .ok_or_else(|| RepoError::UnknownAttribute {
            entity: entity.name.clone(),
            attribute: attribute.to_string(),
        })
}

fn column_value(entity: &Entity, attribute: &str, value: &Value) -> RepoResult<SqlValue> {
    let kind = require_attribute(entity, attribute)?;
    attribute_to_sql(kind, value).map_err(|message| RepoError::InvalidValue {
        entity: entity.name.clone(),
        attribute: attribute.to_string(),
        message,
    })
}

/// Id text in the id column's storage form; `None` when it cannot match any row.
fn id_param(entity: &Entity, id: &str) -> Option<SqlValue> {
    scalar_to_sql(entity.id_type(), &Value::String(id.to_string())).ok()
}

fn not_found(entity: &Entity, id: &str) -> RepoError {
    RepoError::NotFound {
        entity: entity.name.clone(),
        id: id.to_string(),
    }
}
