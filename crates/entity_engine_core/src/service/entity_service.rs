//! Entity use-case service.
//!
//! # Responsibility
//! - Provide read, count, create, update and delete entry points for any
//!   registered entity, and reads scoped to one record's associations.
//! - Run collaborators in a fixed order around every call: authorization,
//!   validation, existence of association edit targets, then the engines.
//!
//! # Invariants
//! - No storage access happens before authorization and validation pass.
//! - Deletion runs the deletion guard, then the pre-delete hook, then the
//!   row delete.
//! - Association edit failures on individual rows never fail the mutation;
//!   they are returned as benign errors in `MutationOutcome`.

use crate::collaborators::{
    AcceptAll, Action, AllowAll, Authorizer, ExistenceChecker, Principal, RecordLimit,
    ValidationPhase, ValidationTarget, Validator,
};
use crate::model::entity::{Cardinality, Entity};
use crate::model::record::{Record, RecordId};
use crate::model::registry::EntityRegistry;
use crate::repo::record_repo::{OrderField, RecordRepository};
use crate::reporter::{BenignError, BenignErrorReporter};
use crate::search::predicate::SearchExpression;
use crate::service::association::AssociationSyncEngine;
use crate::service::deletion_guard::{DeletionGuard, DeletionHook, NoopDeletionHook};
use crate::service::error::{EngineError, EngineResult};
use crate::service::pagination::{
    AssociationScope, CursorPage, CursorPagination, PaginationEngine,
};
use log::info;
use std::collections::BTreeMap;

/// External collaborators called by `EntityService`.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub authorizer: &'a dyn Authorizer,
    pub validator: &'a dyn Validator,
    pub existence: &'a dyn ExistenceChecker,
    pub limits: &'a dyn RecordLimit,
    pub deletion_hook: &'a dyn DeletionHook,
}

impl<'a> Collaborators<'a> {
    /// Allow-all authorizer, accept-all validator and no-op deletion hook.
    pub fn new(existence: &'a dyn ExistenceChecker, limits: &'a dyn RecordLimit) -> Self {
        Self {
            authorizer: &AllowAll,
            validator: &AcceptAll,
            existence,
            limits,
            deletion_hook: &NoopDeletionHook,
        }
    }

    pub fn with_authorizer(mut self, authorizer: &'a dyn Authorizer) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_validator(mut self, validator: &'a dyn Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_deletion_hook(mut self, deletion_hook: &'a dyn DeletionHook) -> Self {
        self.deletion_hook = deletion_hook;
        self
    }
}

/// Association edits applied with a create or update, keyed by relation name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationEdits {
    pub add: BTreeMap<String, Vec<RecordId>>,
    pub remove: BTreeMap<String, Vec<RecordId>>,
}

impl AssociationEdits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, relation: impl Into<String>, ids: &[&str]) -> Self {
        self.add
            .entry(relation.into())
            .or_default()
            .extend(ids.iter().map(|id| id.to_string()));
        self
    }

    pub fn remove(mut self, relation: impl Into<String>, ids: &[&str]) -> Self {
        self.remove
            .entry(relation.into())
            .or_default()
            .extend(ids.iter().map(|id| id.to_string()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Result of a mutation: the stored record and any benign errors.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub record: Record,
    pub benign_errors: Vec<BenignError>,
}

impl MutationOutcome {
    pub fn is_clean(&self) -> bool {
        self.benign_errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditKind {
    Add,
    Remove,
}

/// Resolver-style facade over the engines for every registered entity.
pub struct EntityService<'a, R: RecordRepository> {
    registry: &'a EntityRegistry,
    repo: R,
    collaborators: Collaborators<'a>,
}

impl<'a, R: RecordRepository> EntityService<'a, R> {
    pub fn new(registry: &'a EntityRegistry, repo: R, collaborators: Collaborators<'a>) -> Self {
        Self {
            registry,
            repo,
            collaborators,
        }
    }

    pub fn read_one(&self, principal: &Principal, entity: &str, id: &str) -> EngineResult<Record> {
        let entity = self.authorize(principal, entity, Action::Read)?;
        self.repo
            .get_record(entity, id)?
            .ok_or_else(|| not_found(entity, id))
    }

    /// Offset page; `limit = None` uses the configured default page size.
    pub fn read_page(
        &self,
        principal: &Principal,
        entity: &str,
        search: Option<&SearchExpression>,
        order: &[OrderField],
        offset: u32,
        limit: Option<u32>,
    ) -> EngineResult<Vec<Record>> {
        let entity = self.authorize(principal, entity, Action::Read)?;
        let limit = limit.unwrap_or_else(|| self.collaborators.limits.default_limit());
        self.pagination()
            .read_page(entity, search, order, offset, limit)
    }

    /// Cursor page; when neither `first`, `last` nor `before` is given, the
    /// configured default page size is used as `first`.
    pub fn read_cursor_page(
        &self,
        principal: &Principal,
        entity: &str,
        search: Option<&SearchExpression>,
        order: &[OrderField],
        pagination: &CursorPagination,
    ) -> EngineResult<CursorPage> {
        let entity = self.authorize(principal, entity, Action::Read)?;
        self.pagination()
            .read_cursor_page(entity, search, order, &self.with_default_first(pagination))
    }

    pub fn count(
        &self,
        principal: &Principal,
        entity: &str,
        search: Option<&SearchExpression>,
    ) -> EngineResult<u64> {
        let entity = self.authorize(principal, entity, Action::Read)?;
        self.pagination().count(entity, search)
    }

    /// Offset page of the records associated through `scope`.
    pub fn read_associated_page(
        &self,
        principal: &Principal,
        scope: &AssociationScope<'_>,
        search: Option<&SearchExpression>,
        order: &[OrderField],
        offset: u32,
        limit: Option<u32>,
    ) -> EngineResult<Vec<Record>> {
        self.authorize_association(principal, scope)?;
        let limit = limit.unwrap_or_else(|| self.collaborators.limits.default_limit());
        self.pagination()
            .read_associated_page(self.registry, scope, search, order, offset, limit)
    }

    /// Cursor page of the records associated through `scope`, with the same
    /// page-size default as `read_cursor_page`.
    pub fn read_associated_cursor_page(
        &self,
        principal: &Principal,
        scope: &AssociationScope<'_>,
        search: Option<&SearchExpression>,
        order: &[OrderField],
        pagination: &CursorPagination,
    ) -> EngineResult<CursorPage> {
        self.authorize_association(principal, scope)?;
        self.pagination().read_associated_cursor_page(
            self.registry,
            scope,
            search,
            order,
            &self.with_default_first(pagination),
        )
    }

    pub fn count_associated(
        &self,
        principal: &Principal,
        scope: &AssociationScope<'_>,
        search: Option<&SearchExpression>,
    ) -> EngineResult<u64> {
        self.authorize_association(principal, scope)?;
        self.pagination()
            .count_associated_filtered(self.registry, scope, search)
    }

    /// Inserts `record`, then applies `edits.add`.
    ///
    /// # Errors
    /// - `Validation` when `edits` carries removals, names an unknown
    ///   relation, or gives a to-one relation other than exactly one id.
    /// - `NotFound` when an edit target does not exist.
    pub fn create(
        &self,
        principal: &Principal,
        entity: &str,
        record: &Record,
        edits: &AssociationEdits,
    ) -> EngineResult<MutationOutcome> {
        let entity = self.authorize(principal, entity, Action::Create)?;
        self.collaborators.validator.validate(
            ValidationPhase::Create,
            entity,
            ValidationTarget::Record(record),
        )?;
        if !edits.remove.is_empty() {
            return Err(EngineError::Validation(
                "associations cannot be removed while creating a record".to_string(),
            ));
        }
        self.check_edits(entity, edits)?;

        let id = self.repo.insert_record(entity, record)?;
        let mut reporter = BenignErrorReporter::new();
        self.apply_edits(entity, &id, &edits.add, EditKind::Add, &mut reporter)?;

        let outcome = self.outcome(entity, &id, reporter)?;
        info!(
            "event=entity_create module=service status=ok entity={} benign_errors={}",
            entity.name,
            outcome.benign_errors.len()
        );
        Ok(outcome)
    }

    /// Writes `changes`, then applies `edits.remove` followed by `edits.add`.
    pub fn update(
        &self,
        principal: &Principal,
        entity: &str,
        id: &str,
        changes: &Record,
        edits: &AssociationEdits,
    ) -> EngineResult<MutationOutcome> {
        let entity = self.authorize(principal, entity, Action::Update)?;
        self.collaborators.validator.validate(
            ValidationPhase::Update,
            entity,
            ValidationTarget::Record(changes),
        )?;
        self.check_edits(entity, edits)?;

        self.repo.update_record(entity, id, changes)?;
        let mut reporter = BenignErrorReporter::new();
        self.apply_edits(entity, id, &edits.remove, EditKind::Remove, &mut reporter)?;
        self.apply_edits(entity, id, &edits.add, EditKind::Add, &mut reporter)?;

        let outcome = self.outcome(entity, id, reporter)?;
        info!(
            "event=entity_update module=service status=ok entity={} benign_errors={}",
            entity.name,
            outcome.benign_errors.len()
        );
        Ok(outcome)
    }

    /// Deletes one record once no `reject` association references it.
    ///
    /// The outcome carries the record as it was before deletion.
    pub fn delete(
        &self,
        principal: &Principal,
        entity: &str,
        id: &str,
    ) -> EngineResult<MutationOutcome> {
        let entity = self.authorize(principal, entity, Action::Delete)?;
        self.collaborators
            .validator
            .validate(ValidationPhase::Delete, entity, ValidationTarget::Id(id))?;

        let record = self
            .repo
            .get_record(entity, id)?
            .ok_or_else(|| not_found(entity, id))?;
        DeletionGuard::new(self.registry, &self.repo).validate_for_deletion(&entity.name, id)?;

        let mut reporter = BenignErrorReporter::new();
        self.collaborators
            .deletion_hook
            .update_associations(entity, &record, &mut reporter)?;
        self.repo.delete_record(entity, id)?;

        info!(
            "event=entity_delete module=service status=ok entity={} benign_errors={}",
            entity.name,
            reporter.len()
        );
        Ok(MutationOutcome {
            record,
            benign_errors: reporter.into_errors(),
        })
    }

    fn pagination(&self) -> PaginationEngine<'_, R> {
        PaginationEngine::new(&self.repo, self.collaborators.limits)
    }

    fn with_default_first(&self, pagination: &CursorPagination) -> CursorPagination {
        let mut pagination = pagination.clone();
        if pagination.first.is_none() && pagination.last.is_none() && pagination.before.is_none()
        {
            pagination.first = Some(self.collaborators.limits.default_limit());
        }
        pagination
    }

    /// Both the scoping entity and the relation target must be readable.
    fn authorize_association(
        &self,
        principal: &Principal,
        scope: &AssociationScope<'_>,
    ) -> EngineResult<()> {
        self.authorize(principal, scope.entity, Action::Read)?;
        let relation = self.registry.relation(scope.entity, scope.relation)?;
        self.authorize(principal, &relation.target, Action::Read)?;
        Ok(())
    }

    fn authorize(
        &self,
        principal: &Principal,
        entity: &str,
        action: Action,
    ) -> EngineResult<&'a Entity> {
        let entity = self.registry.entity(entity)?;
        if self
            .collaborators
            .authorizer
            .is_authorized(principal, entity, action)
        {
            return Ok(entity);
        }
        info!(
            "event=authorization module=service status=error entity={} action={}",
            entity.name,
            action.as_str()
        );
        Err(EngineError::Unauthorized {
            entity: entity.name.clone(),
            action: action.as_str(),
        })
    }

    fn check_edits(&self, entity: &Entity, edits: &AssociationEdits) -> EngineResult<()> {
        for (kind, edits) in [(EditKind::Add, &edits.add), (EditKind::Remove, &edits.remove)] {
            for (relation_name, ids) in edits {
                let relation = entity.relation_named(relation_name).ok_or_else(|| {
                    EngineError::Validation(format!(
                        "entity `{}` has no association `{relation_name}`",
                        entity.name
                    ))
                })?;
                if relation.cardinality == Cardinality::ToOne && ids.len() != 1 {
                    return Err(EngineError::Validation(format!(
                        "to-one association `{relation_name}` takes exactly one id, got {}",
                        ids.len()
                    )));
                }
                if kind == EditKind::Add {
                    let target = self.registry.entity(&relation.target)?;
                    self.collaborators.existence.validate_existence(ids, target)?;
                }
            }
        }
        Ok(())
    }

    fn apply_edits(
        &self,
        entity: &Entity,
        id: &str,
        edits: &BTreeMap<String, Vec<RecordId>>,
        kind: EditKind,
        reporter: &mut BenignErrorReporter,
    ) -> EngineResult<()> {
        let sync = AssociationSyncEngine::new(self.registry, &self.repo);
        for (relation_name, ids) in edits {
            let relation = self.registry.relation(&entity.name, relation_name)?;
            match (relation.cardinality, kind, ids.first()) {
                (Cardinality::ToOne, EditKind::Add, Some(fk)) => {
                    sync.add_to_one(&entity.name, relation_name, id, fk, reporter)?;
                }
                (Cardinality::ToOne, EditKind::Remove, Some(fk)) => {
                    sync.remove_to_one(&entity.name, relation_name, id, fk, reporter)?;
                }
                (Cardinality::ToOne, _, None) => {}
                (Cardinality::ToMany, EditKind::Add, _) => {
                    sync.add_to_many(&entity.name, relation_name, id, ids, reporter, true)?;
                }
                (Cardinality::ToMany, EditKind::Remove, _) => {
                    sync.remove_to_many(&entity.name, relation_name, id, ids, reporter, true)?;
                }
            }
        }
        Ok(())
    }

    fn outcome(
        &self,
        entity: &Entity,
        id: &str,
        reporter: BenignErrorReporter,
    ) -> EngineResult<MutationOutcome> {
        let record = self
            .repo
            .get_record(entity, id)?
            .ok_or_else(|| not_found(entity, id))?;
        Ok(MutationOutcome {
            record,
            benign_errors: reporter.into_errors(),
        })
    }
}

fn not_found(entity: &Entity, id: &str) -> EngineError {
    EngineError::NotFound {
        entity: entity.name.clone(),
        ids: vec![id.to_string()],
    }
}
