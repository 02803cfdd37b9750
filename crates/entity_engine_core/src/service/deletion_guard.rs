//! Pre-deletion reference counting and association cleanup.
//!
//! # Responsibility
//! - Count records still associated with a record through `reject`
//!   relations and refuse deletion while any exist.
//! - Provide the pre-delete hook seam, with a no-op default and a hook that
//!   clears `update` relations.
//!
//! # Invariants
//! - Counting a missing record is `NotFound`, never zero.
//! - Relations with `on_delete = update` never block deletion.
//! - A local to-one key counts only when its target row still exists.

use crate::codec::fk_array::ids_from_value;
use crate::model::entity::{Cardinality, DeletePolicy, Entity, KeysIn, Relation};
use crate::model::record::{id_text, Record, RecordId};
use crate::model::registry::EntityRegistry;
use crate::repo::record_repo::{RecordRepository, ScanRequest};
use crate::reporter::{BenignError, BenignErrorKind, BenignErrorReporter};
use crate::search::predicate::{translate, SearchExpression, StoragePredicate};
use crate::service::association::AssociationSyncEngine;
use crate::service::error::{EngineError, EngineResult};
use log::{info, warn};
use std::collections::BTreeMap;

/// Associated-record counts for one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationCount {
    pub total: u64,
    /// Count per `reject` relation, including zero counts.
    pub by_relation: BTreeMap<String, u64>,
}

impl AssociationCount {
    /// Relation names with at least one associated record.
    pub fn blocking_relations(&self) -> Vec<String> {
        self.by_relation
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

pub struct DeletionGuard<'a, R: RecordRepository> {
    registry: &'a EntityRegistry,
    repo: &'a R,
}

impl<'a, R: RecordRepository> DeletionGuard<'a, R> {
    pub fn new(registry: &'a EntityRegistry, repo: &'a R) -> Self {
        Self { registry, repo }
    }

    /// Counts records associated with `id` through `reject` relations.
    pub fn count_associated(&self, entity: &str, id: &str) -> EngineResult<AssociationCount> {
        let owner = self.registry.entity(entity)?;
        let record = self
            .repo
            .get_record(owner, id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: entity.to_string(),
                ids: vec![id.to_string()],
            })?;

        let mut counts = AssociationCount::default();
        for relation in owner
            .relations()
            .filter(|relation| relation.on_delete == DeletePolicy::Reject)
        {
            let count = self.count_relation(relation, id, &record)?;
            counts.total += count;
            counts.by_relation.insert(relation.name.clone(), count);
        }
        Ok(counts)
    }

    /// Fails with `DependentRecordsExist` while any `reject` association remains.
    pub fn validate_for_deletion(&self, entity: &str, id: &str) -> EngineResult<()> {
        let counts = self.count_associated(entity, id)?;
        if counts.total == 0 {
            return Ok(());
        }
        info!(
            "event=delete_rejected module=deletion_guard status=skipped entity={} associated={}",
            entity, counts.total
        );
        Err(EngineError::DependentRecordsExist {
            entity: entity.to_string(),
            id: id.to_string(),
            relations: counts.blocking_relations(),
        })
    }

    pub fn can_delete(&self, entity: &str, id: &str) -> EngineResult<bool> {
        Ok(self.count_associated(entity, id)?.total == 0)
    }

    fn count_relation(&self, relation: &Relation, id: &str, record: &Record) -> EngineResult<u64> {
        let target = self.registry.entity(&relation.target)?;
        match (relation.cardinality, relation.keys_in) {
            (Cardinality::ToMany, KeysIn::Local) => {
                Ok(ids_from_value(record.get(&relation.key)).len() as u64)
            }
            (Cardinality::ToOne, KeysIn::Local) => {
                let Some(fk) = record.get(&relation.key).and_then(id_text) else {
                    return Ok(0);
                };
                Ok(u64::from(self.repo.get_record(target, &fk)?.is_some()))
            }
            (Cardinality::ToMany, KeysIn::Foreign) => {
                let filter = references(target, relation, id)?;
                Ok(self.repo.count(target, &filter)?)
            }
            (Cardinality::ToOne, KeysIn::Foreign) => {
                let filter = references(target, relation, id)?;
                Ok(u64::from(self.repo.exists(target, &filter)?))
            }
        }
    }
}

fn references(target: &Entity, relation: &Relation, id: &str) -> EngineResult<StoragePredicate> {
    Ok(translate(
        &SearchExpression::references(target, &relation.key, id),
        target,
    )?)
}

/// Hook run after the deletion guard passes and before the row is deleted.
pub trait DeletionHook {
    fn update_associations(
        &self,
        _entity: &Entity,
        _record: &Record,
        _reporter: &mut BenignErrorReporter,
    ) -> EngineResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDeletionHook;

impl DeletionHook for NoopDeletionHook {}

/// Removes the deleted record from every `update` relation, best effort.
pub struct ClearAssociationsHook<'a, R: RecordRepository> {
    registry: &'a EntityRegistry,
    repo: &'a R,
}

impl<'a, R: RecordRepository> ClearAssociationsHook<'a, R> {
    pub fn new(registry: &'a EntityRegistry, repo: &'a R) -> Self {
        Self { registry, repo }
    }

    /// Ids of target rows whose key references `id`.
    fn referencing_ids(
        &self,
        target: &Entity,
        relation: &Relation,
        id: &str,
        reporter: &mut BenignErrorReporter,
    ) -> EngineResult<Vec<RecordId>> {
        let filter = references(target, relation, id)?;
        let scanned = self.repo.scan(
            target,
            &ScanRequest {
                filter: &filter,
                order: &[],
                limit: None,
                offset: 0,
            },
        );
        match scanned {
            Ok(rows) => Ok(rows.iter().filter_map(|row| row.id_of(target)).collect()),
            Err(err) => {
                warn!(
                    "event=delete_hook module=deletion_guard status=error entity={} relation={}",
                    target.name, relation.name
                );
                reporter.push(
                    BenignError::new(
                        BenignErrorKind::Storage,
                        target.name.clone(),
                        err.to_string(),
                    )
                    .with_id(id)
                    .with_relation(relation.name.clone()),
                );
                Ok(Vec::new())
            }
        }
    }

    fn unlink_many(
        &self,
        sync: &AssociationSyncEngine<'a, R>,
        entity: &Entity,
        relation: &Relation,
        id: &str,
        linked: &[RecordId],
        reporter: &mut BenignErrorReporter,
    ) -> EngineResult<()> {
        if linked.is_empty() {
            return Ok(());
        }
        sync.remove_to_many(&entity.name, &relation.name, id, linked, reporter, true)?;
        Ok(())
    }
}

impl<R: RecordRepository> DeletionHook for ClearAssociationsHook<'_, R> {
    fn update_associations(
        &self,
        entity: &Entity,
        record: &Record,
        reporter: &mut BenignErrorReporter,
    ) -> EngineResult<()> {
        let Some(id) = record.id_of(entity) else {
            return Ok(());
        };
        let sync = AssociationSyncEngine::new(self.registry, self.repo);

        for relation in entity
            .relations()
            .filter(|relation| relation.on_delete == DeletePolicy::Update)
        {
            let target = self.registry.entity(&relation.target)?;
            match (relation.cardinality, relation.keys_in) {
                (Cardinality::ToOne, KeysIn::Local) => {
                    if let Some(fk) = record.get(&relation.key).and_then(id_text) {
                        sync.remove_to_one(&entity.name, &relation.name, &id, &fk, reporter)?;
                    }
                }
                (Cardinality::ToMany, KeysIn::Local) => {
                    let linked = ids_from_value(record.get(&relation.key));
                    self.unlink_many(&sync, entity, relation, &id, &linked, reporter)?;
                }
                (Cardinality::ToOne, KeysIn::Foreign) => {
                    for fk in self.referencing_ids(target, relation, &id, reporter)? {
                        sync.remove_to_one(&entity.name, &relation.name, &id, &fk, reporter)?;
                    }
                }
                (Cardinality::ToMany, KeysIn::Foreign) => {
                    let linked = self.referencing_ids(target, relation, &id, reporter)?;
                    self.unlink_many(&sync, entity, relation, &id, &linked, reporter)?;
                }
            }
        }
        Ok(())
    }
}
