//! Engine-level error surface.
//!
//! # Responsibility
//! - Map schema, search, cursor, repository and collaborator failures into
//!   one error type returned by the engines and the entity service.
//!
//! # Invariants
//! - `Validation`, `InvalidCursor`, `NotFound`, `DependentRecordsExist`,
//!   `Unauthorized` are client-facing; `Repo` is a storage failure.
//! - Repository `NotFound` is surfaced as `EngineError::NotFound`.

use crate::codec::cursor::CursorError;
use crate::collaborators::{ExistenceError, ValidationError};
use crate::model::registry::SchemaError;
use crate::repo::record_repo::RepoError;
use crate::search::predicate::SearchError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug)]
pub enum EngineError {
    /// Caller input rejected before any storage access.
    Validation(String),
    InvalidCursor(CursorError),
    NotFound {
        entity: String,
        ids: Vec<String>,
    },
    /// Record is still referenced through `reject` relations.
    DependentRecordsExist {
        entity: String,
        id: String,
        relations: Vec<String>,
    },
    Unauthorized {
        entity: String,
        action: &'static str,
    },
    /// Relation used through an operation that does not match its
    /// cardinality or storage side.
    RelationMismatch {
        entity: String,
        relation: String,
        expected: &'static str,
    },
    Schema(SchemaError),
    Search(SearchError),
    Repo(RepoError),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(message) => write!(f, "validation failed: {message}"),
            Self::InvalidCursor(err) => write!(f, "invalid cursor: {err}"),
            Self::NotFound { entity, ids } => {
                write!(f, "{entity} not found: {}", ids.join(", "))
            }
            Self::DependentRecordsExist {
                entity,
                id,
                relations,
            } => write!(
                f,
                "{entity} {id} has associated records through: {}",
                relations.join(", ")
            ),
            Self::Unauthorized { entity, action } => {
                write!(f, "not authorized to {action} {entity}")
            }
            Self::RelationMismatch {
                entity,
                relation,
                expected,
            } => write!(f, "relation `{entity}.{relation}` is not {expected}"),
            Self::Schema(err) => write!(f, "{err}"),
            Self::Search(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidCursor(err) => Some(err),
            Self::Schema(err) => Some(err),
            Self::Search(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl EngineError {
    /// True for errors caused by caller input rather than storage.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Repo(_) | Self::Schema(_))
    }
}

impl From<CursorError> for EngineError {
    fn from(value: CursorError) -> Self {
        Self::InvalidCursor(value)
    }
}

impl From<SchemaError> for EngineError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<SearchError> for EngineError {
    fn from(value: SearchError) -> Self {
        Self::Search(value)
    }
}

impl From<ValidationError> for EngineError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value.message)
    }
}

impl From<RepoError> for EngineError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound { entity, id } => Self::NotFound {
                entity,
                ids: vec![id],
            },
            RepoError::UnknownAttribute { .. } | RepoError::InvalidValue { .. } => {
                Self::Validation(value.to_string())
            }
            other => Self::Repo(other),
        }
    }
}

impl From<ExistenceError> for EngineError {
    fn from(value: ExistenceError) -> Self {
        match value {
            ExistenceError::NotFound { entity, ids } => Self::NotFound { entity, ids },
            ExistenceError::Repo(err) => err.into(),
        }
    }
}
