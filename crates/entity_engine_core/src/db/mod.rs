//! SQLite storage bootstrap and schema DDL entry points.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the engine.
//! - Create one table per registered entity before any engine use.
//!
//! # Invariants
//! - Engine code must not read/write records before `apply_schema` succeeds.
//! - Schema application is additive: existing columns are never dropped.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod ddl;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// Existing table uses a different primary key column than the entity declares.
    IdColumnMismatch {
        table: String,
        expected: String,
        actual: Option<String>,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::IdColumnMismatch {
                table,
                expected,
                actual,
            } => write!(
                f,
                "table `{table}` primary key is `{}`, entity declares `{expected}`",
                actual.as_deref().unwrap_or("<none>")
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::IdColumnMismatch { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
