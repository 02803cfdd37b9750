//! Table DDL derived from registered entities.
//!
//! # Responsibility
//! - Create one table per entity, keyed by its id attribute.
//! - Add columns for attributes declared after a table was first created.
//!
//! # Invariants
//! - Array attributes are `TEXT` columns holding JSON arrays.
//! - All statements of one `apply_schema` call run in a single transaction.
//! - Existing columns and rows are never altered or dropped.

use crate::db::{DbError, DbResult};
use crate::model::entity::{AttributeType, Entity, ScalarType};
use crate::model::registry::EntityRegistry;
use crate::search::predicate::quote_ident;
use log::info;
use rusqlite::{Connection, Transaction};

/// Creates or extends tables for every entity in `registry`.
pub fn apply_schema(conn: &mut Connection, registry: &EntityRegistry) -> DbResult<()> {
    let tx = conn.transaction()?;
    for entity in registry.entities() {
        apply_entity(&tx, entity)?;
    }
    tx.commit()?;
    Ok(())
}

/// Returns the `CREATE TABLE` statement for one entity.
pub fn create_table_sql(entity: &Entity) -> String {
    let mut columns = Vec::new();
    for (attribute, kind) in entity.attributes() {
        if attribute == entity.id_attribute {
            let id_sql = match kind.scalar() {
                ScalarType::Int => "INTEGER PRIMARY KEY",
                _ => "TEXT PRIMARY KEY NOT NULL",
            };
            columns.push(format!("{} {id_sql}", quote_ident(attribute)));
        } else {
            columns.push(format!("{} {}", quote_ident(attribute), column_type(kind)));
        }
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        quote_ident(&entity.storage_name),
        columns.join(",\n    ")
    )
}

fn apply_entity(tx: &Transaction<'_>, entity: &Entity) -> DbResult<()> {
    tx.execute_batch(&create_table_sql(entity))?;

    let existing = table_columns(tx, &entity.storage_name)?;
    let primary_key = existing
        .iter()
        .find(|column| column.is_primary_key)
        .map(|column| column.name.clone());
    if primary_key.as_deref() != Some(entity.id_attribute.as_str()) {
        return Err(DbError::IdColumnMismatch {
            table: entity.storage_name.clone(),
            expected: entity.id_attribute.clone(),
            actual: primary_key,
        });
    }

    for (attribute, kind) in entity.attributes() {
        if existing.iter().any(|column| column.name == attribute) {
            continue;
        }
        tx.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {};",
            quote_ident(&entity.storage_name),
            quote_ident(attribute),
            column_type(kind)
        ))?;
        info!(
            "event=schema_column_added module=db status=ok table={} column={}",
            entity.storage_name, attribute
        );
    }
    Ok(())
}

fn column_type(kind: AttributeType) -> &'static str {
    match kind {
        AttributeType::Array(_) => "TEXT",
        AttributeType::Scalar(ScalarType::Int | ScalarType::Boolean) => "INTEGER",
        AttributeType::Scalar(ScalarType::Float) => "REAL",
        AttributeType::Scalar(ScalarType::String | ScalarType::Date | ScalarType::DateTime) => {
            "TEXT"
        }
    }
}

struct ColumnInfo {
    name: String,
    is_primary_key: bool,
}

fn table_columns(conn: &Connection, table: &str) -> DbResult<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(ColumnInfo {
            name: row.get("name")?,
            is_primary_key: row.get::<_, i64>("pk")? > 0,
        });
    }
    Ok(columns)
}
