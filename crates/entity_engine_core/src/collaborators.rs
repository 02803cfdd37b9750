//! Narrow interfaces to collaborators outside the engine.
//!
//! # Responsibility
//! - Define the authorization, validation, existence and record-limit seams
//!   the entity service calls around engine operations.
//! - Ship permissive defaults plus a repository-backed existence checker and
//!   a config-backed record limit.
//!
//! # Invariants
//! - Engines never decide authorization or input validity themselves.
//! - Record limits are applied before any bounded scan runs.

use crate::config::EngineConfig;
use crate::model::entity::Entity;
use crate::model::record::{Record, RecordId};
use crate::repo::record_repo::{RecordRepository, RepoError};
use log::debug;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Caller identity handed to the authorizer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Principal {
    pub subject: String,
    pub roles: BTreeSet<String>,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

pub trait Authorizer {
    fn is_authorized(&self, principal: &Principal, entity: &Entity, action: Action) -> bool;
}

/// Grants every action.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn is_authorized(&self, _principal: &Principal, _entity: &Entity, _action: Action) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPhase {
    Create,
    Update,
    Delete,
}

/// What a validator is asked to inspect.
#[derive(Debug, Clone, Copy)]
pub enum ValidationTarget<'a> {
    Record(&'a Record),
    Id(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ValidationError {}

pub trait Validator {
    fn validate(
        &self,
        phase: ValidationPhase,
        entity: &Entity,
        target: ValidationTarget<'_>,
    ) -> Result<(), ValidationError>;
}

/// Accepts every input.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(
        &self,
        _phase: ValidationPhase,
        _entity: &Entity,
        _target: ValidationTarget<'_>,
    ) -> Result<(), ValidationError> {
        Ok(())
    }
}

#[derive(Debug)]
pub enum ExistenceError {
    /// Ids with no stored row, in request order.
    NotFound { entity: String, ids: Vec<RecordId> },
    Repo(RepoError),
}

impl Display for ExistenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { entity, ids } => {
                write!(f, "{entity} records not found: {}", ids.join(", "))
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ExistenceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NotFound { .. } => None,
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<RepoError> for ExistenceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

pub trait ExistenceChecker {
    fn validate_existence(&self, ids: &[RecordId], entity: &Entity) -> Result<(), ExistenceError>;
}

/// Checks ids against stored rows through a record repository.
pub struct RepositoryExistenceChecker<'r, R: RecordRepository> {
    repo: &'r R,
}

impl<'r, R: RecordRepository> RepositoryExistenceChecker<'r, R> {
    pub fn new(repo: &'r R) -> Self {
        Self { repo }
    }
}

impl<R: RecordRepository> ExistenceChecker for RepositoryExistenceChecker<'_, R> {
    fn validate_existence(&self, ids: &[RecordId], entity: &Entity) -> Result<(), ExistenceError> {
        if ids.is_empty() {
            return Ok(());
        }
        let missing = self.repo.missing_ids(entity, ids)?;
        if missing.is_empty() {
            return Ok(());
        }
        Err(ExistenceError::NotFound {
            entity: entity.name.clone(),
            ids: missing,
        })
    }
}

/// Where a limit is being applied.
#[derive(Debug, Clone, Copy)]
pub struct LimitContext<'a> {
    pub entity: &'a str,
    pub operation: &'static str,
}

pub trait RecordLimit {
    /// Bounds a requested page size. Never returns 0 for a non-zero request.
    fn clamp_limit(&self, requested: u32, context: &LimitContext<'_>) -> u32;

    /// Page size used when the caller supplies none.
    fn default_limit(&self) -> u32;
}

/// Record limit backed by `EngineConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfiguredRecordLimit {
    pub max_records: u32,
    pub default_page_size: u32,
}

impl ConfiguredRecordLimit {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_records: config.record_limit,
            default_page_size: config.default_page_size,
        }
    }
}

impl Default for ConfiguredRecordLimit {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl RecordLimit for ConfiguredRecordLimit {
    fn clamp_limit(&self, requested: u32, context: &LimitContext<'_>) -> u32 {
        let max = self.max_records.max(1);
        if requested <= max {
            return requested;
        }
        debug!(
            "event=record_limit_clamped module=engine status=ok entity={} operation={} requested={} max={}",
            context.entity, context.operation, requested, max
        );
        max
    }

    fn default_limit(&self) -> u32 {
        self.default_page_size.min(self.max_records).max(1)
    }
}
