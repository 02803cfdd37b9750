//! Data-access engine for dynamically described entities.
//! This crate is the single source of truth for pagination, association and
//! deletion invariants shared by every entity.

pub mod codec;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod reporter;
pub mod search;
pub mod service;

pub use codec::cursor::{decode_cursor, encode_cursor, CursorError};
pub use collaborators::{
    AcceptAll, Action, AllowAll, Authorizer, ConfiguredRecordLimit, ExistenceChecker,
    ExistenceError, LimitContext, Principal, RecordLimit, RepositoryExistenceChecker,
    ValidationError, ValidationPhase, ValidationTarget, Validator,
};
pub use config::{ConfigError, EngineConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::entity::{
    AttributeType, Cardinality, DeletePolicy, Entity, KeysIn, Relation, ScalarType,
};
pub use model::record::{Record, RecordId};
pub use model::registry::{EntityRegistry, SchemaError, SchemaResult};
pub use repo::record_repo::{
    OrderField, RecordRepository, RepoError, RepoResult, SortDirection, SqliteRecordRepository,
};
pub use reporter::{BenignError, BenignErrorKind, BenignErrorReporter};
pub use search::predicate::{Operator, SearchError, SearchExpression, ValueType};
pub use service::association::{AssociationPair, AssociationSyncEngine};
pub use service::deletion_guard::{
    AssociationCount, ClearAssociationsHook, DeletionGuard, DeletionHook, NoopDeletionHook,
};
pub use service::entity_service::{
    AssociationEdits, Collaborators, EntityService, MutationOutcome,
};
pub use service::error::{EngineError, EngineResult};
pub use service::pagination::{
    AssociationScope, CursorPage, CursorPagination, Edge, PageInfo, PaginationEngine,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
