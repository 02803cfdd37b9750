//! Bidirectional association maintenance without join tables.
//!
//! # Responsibility
//! - Add and remove links for any declared relation, addressed by
//!   `(entity, relation)` through the injected registry.
//! - Keep both sides of mirrored relations consistent: foreign-key arrays on
//!   both participants, or a scalar key mirrored by an array.
//!
//! # Invariants
//! - Every storage write is a single-row statement; there is no transaction
//!   across the two sides of a relation.
//! - Inverse edits run before the local edit and never recurse again
//!   (`propagate_inverse = false` on the inverse call).
//! - Clearing a scalar key is compare-and-clear; a row whose key has moved on
//!   is left untouched (`conflict_skipped`).
//! - Storage and per-row failures go to the reporter. Only schema misuse is
//!   returned as an error.

use crate::codec::fk_array::{difference_ids, ids_from_value, ids_to_value, union_ids};
use crate::model::entity::{Cardinality, Entity, KeysIn, Relation};
use crate::model::record::{id_text, RecordId};
use crate::model::registry::EntityRegistry;
use crate::repo::record_repo::{RecordRepository, RepoError};
use crate::reporter::{BenignError, BenignErrorKind, BenignErrorReporter};
use crate::service::error::{EngineError, EngineResult};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One `(record id, foreign key)` link for bulk operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationPair {
    pub id: RecordId,
    pub fk: RecordId,
}

impl AssociationPair {
    pub fn new(id: impl Into<RecordId>, fk: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fk: fk.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayEdit {
    Add,
    Remove,
}

struct Resolved<'r> {
    owner: &'r Entity,
    relation: &'r Relation,
    target: &'r Entity,
    reverse: Option<&'r Relation>,
}

impl Resolved<'_> {
    fn require(&self, cardinality: Cardinality, expected: &'static str) -> EngineResult<()> {
        if self.relation.cardinality == cardinality {
            return Ok(());
        }
        Err(EngineError::RelationMismatch {
            entity: self.owner.name.clone(),
            relation: self.relation.name.clone(),
            expected,
        })
    }

    /// Reverse relation when it is stored as an array on the target.
    fn reverse_array(&self) -> Option<&Relation> {
        self.reverse.filter(|reverse| reverse.is_local_array())
    }
}

/// Association synchronization over a record repository.
pub struct AssociationSyncEngine<'a, R: RecordRepository> {
    registry: &'a EntityRegistry,
    repo: &'a R,
}

impl<'a, R: RecordRepository> AssociationSyncEngine<'a, R> {
    pub fn new(registry: &'a EntityRegistry, repo: &'a R) -> Self {
        Self { registry, repo }
    }

    /// Links record `id` to `fk` through a to-one relation.
    ///
    /// For a local key mirrored by an array on the target, `id` is moved from
    /// the previous target's array into `fk`'s array. Returns rows written on
    /// the key-holding side.
    pub fn add_to_one(
        &self,
        entity: &str,
        relation: &str,
        id: &str,
        fk: &str,
        reporter: &mut BenignErrorReporter,
    ) -> EngineResult<usize> {
        let resolved = self.resolve(entity, relation)?;
        resolved.require(Cardinality::ToOne, "to_one")?;

        let affected = match resolved.relation.keys_in {
            KeysIn::Local => self.link_local_to_one(
                resolved.owner,
                resolved.relation,
                resolved.target,
                resolved.reverse_array(),
                id,
                fk,
                true,
                reporter,
            ),
            KeysIn::Foreign => self.write_scalar(
                resolved.target,
                &resolved.relation.name,
                fk,
                &resolved.relation.key,
                id,
                reporter,
            ),
        };
        log_sync("association_add_to_one", entity, relation, affected);
        Ok(affected)
    }

    /// Unlinks record `id` from `fk` through a to-one relation.
    ///
    /// Returns 0 without error when the stored key no longer equals `fk`.
    pub fn remove_to_one(
        &self,
        entity: &str,
        relation: &str,
        id: &str,
        fk: &str,
        reporter: &mut BenignErrorReporter,
    ) -> EngineResult<usize> {
        let resolved = self.resolve(entity, relation)?;
        resolved.require(Cardinality::ToOne, "to_one")?;

        let affected = match resolved.relation.keys_in {
            KeysIn::Local => {
                if let Some(reverse) = resolved.reverse_array() {
                    self.edit_array(
                        resolved.target,
                        reverse,
                        fk,
                        &[id.to_string()],
                        ArrayEdit::Remove,
                        reporter,
                    );
                }
                self.clear_scalar_if(
                    resolved.owner,
                    &resolved.relation.name,
                    id,
                    &resolved.relation.key,
                    fk,
                    reporter,
                )
            }
            KeysIn::Foreign => self.clear_scalar_if(
                resolved.target,
                &resolved.relation.name,
                fk,
                &resolved.relation.key,
                id,
                reporter,
            ),
        };
        log_sync("association_remove_to_one", entity, relation, affected);
        Ok(affected)
    }

    /// Links record `id` to every id in `new_ids` through a to-many relation.
    ///
    /// With `propagate_inverse`, the reverse side of each new id is updated
    /// first, without further propagation. Returns rows written.
    pub fn add_to_many(
        &self,
        entity: &str,
        relation: &str,
        id: &str,
        new_ids: &[RecordId],
        reporter: &mut BenignErrorReporter,
        propagate_inverse: bool,
    ) -> EngineResult<usize> {
        let resolved = self.resolve(entity, relation)?;
        resolved.require(Cardinality::ToMany, "to_many")?;

        let affected = match resolved.relation.keys_in {
            KeysIn::Local => {
                if propagate_inverse {
                    self.propagate(&resolved, id, new_ids, ArrayEdit::Add, reporter);
                }
                self.edit_array(
                    resolved.owner,
                    resolved.relation,
                    id,
                    new_ids,
                    ArrayEdit::Add,
                    reporter,
                )
            }
            KeysIn::Foreign => new_ids
                .iter()
                .map(|target_id| {
                    self.write_scalar(
                        resolved.target,
                        &resolved.relation.name,
                        target_id,
                        &resolved.relation.key,
                        id,
                        reporter,
                    )
                })
                .sum::<usize>(),
        };
        log_sync("association_add_to_many", entity, relation, affected);
        Ok(affected)
    }

    /// Unlinks record `id` from every id in `removed_ids`.
    ///
    /// Mirrors `add_to_many`; inverse scalar keys use compare-and-clear.
    pub fn remove_to_many(
        &self,
        entity: &str,
        relation: &str,
        id: &str,
        removed_ids: &[RecordId],
        reporter: &mut BenignErrorReporter,
        propagate_inverse: bool,
    ) -> EngineResult<usize> {
        let resolved = self.resolve(entity, relation)?;
        resolved.require(Cardinality::ToMany, "to_many")?;

        let affected = match resolved.relation.keys_in {
            KeysIn::Local => {
                if propagate_inverse {
                    self.propagate(&resolved, id, removed_ids, ArrayEdit::Remove, reporter);
                }
                self.edit_array(
                    resolved.owner,
                    resolved.relation,
                    id,
                    removed_ids,
                    ArrayEdit::Remove,
                    reporter,
                )
            }
            KeysIn::Foreign => removed_ids
                .iter()
                .map(|target_id| {
                    self.clear_scalar_if(
                        resolved.target,
                        &resolved.relation.name,
                        target_id,
                        &resolved.relation.key,
                        id,
                        reporter,
                    )
                })
                .sum::<usize>(),
        };
        log_sync("association_remove_to_many", entity, relation, affected);
        Ok(affected)
    }

    /// Sets a local to-one key on many rows, one independent write per pair.
    pub fn bulk_associate(
        &self,
        entity: &str,
        relation: &str,
        pairs: &[AssociationPair],
        reporter: &mut BenignErrorReporter,
    ) -> EngineResult<usize> {
        let resolved = self.resolve_bulk(entity, relation)?;
        let affected = pairs
            .iter()
            .map(|pair| {
                self.write_scalar(
                    resolved.owner,
                    &resolved.relation.name,
                    &pair.id,
                    &resolved.relation.key,
                    &pair.fk,
                    reporter,
                )
            })
            .sum::<usize>();
        log_sync("association_bulk_associate", entity, relation, affected);
        Ok(affected)
    }

    /// Compare-and-clears a local to-one key on many rows.
    pub fn bulk_disassociate(
        &self,
        entity: &str,
        relation: &str,
        pairs: &[AssociationPair],
        reporter: &mut BenignErrorReporter,
    ) -> EngineResult<usize> {
        let resolved = self.resolve_bulk(entity, relation)?;
        let affected = pairs
            .iter()
            .map(|pair| {
                self.clear_scalar_if(
                    resolved.owner,
                    &resolved.relation.name,
                    &pair.id,
                    &resolved.relation.key,
                    &pair.fk,
                    reporter,
                )
            })
            .sum::<usize>();
        log_sync("association_bulk_disassociate", entity, relation, affected);
        Ok(affected)
    }

    fn resolve(&self, entity: &str, relation: &str) -> EngineResult<Resolved<'a>> {
        let owner = self.registry.entity(entity)?;
        let declared = self.registry.relation(entity, relation)?;
        let target = self.registry.entity(&declared.target)?;
        let reverse = self.registry.reverse_of(entity, relation)?;
        Ok(Resolved {
            owner,
            relation: declared,
            target,
            reverse,
        })
    }

    fn resolve_bulk(&self, entity: &str, relation: &str) -> EngineResult<Resolved<'a>> {
        let resolved = self.resolve(entity, relation)?;
        if resolved.relation.cardinality != Cardinality::ToOne
            || resolved.relation.keys_in != KeysIn::Local
        {
            return Err(EngineError::RelationMismatch {
                entity: entity.to_string(),
                relation: relation.to_string(),
                expected: "to_one with a local key",
            });
        }
        Ok(resolved)
    }

    /// Applies the inverse side of a local to-many edit for each target id.
    fn propagate(
        &self,
        resolved: &Resolved<'a>,
        id: &str,
        target_ids: &[RecordId],
        edit: ArrayEdit,
        reporter: &mut BenignErrorReporter,
    ) {
        let Some(reverse) = resolved.reverse.filter(|reverse| reverse.keys_in == KeysIn::Local)
        else {
            return;
        };
        let owner_id = [id.to_string()];
        for target_id in target_ids {
            match (reverse.cardinality, edit) {
                (Cardinality::ToMany, _) => {
                    self.edit_array(resolved.target, reverse, target_id, &owner_id, edit, reporter);
                }
                (Cardinality::ToOne, ArrayEdit::Add) => {
                    self.link_local_to_one(
                        resolved.target,
                        reverse,
                        resolved.owner,
                        Some(resolved.relation),
                        target_id,
                        id,
                        false,
                        reporter,
                    );
                }
                (Cardinality::ToOne, ArrayEdit::Remove) => {
                    self.clear_scalar_if(
                        resolved.target,
                        &reverse.name,
                        target_id,
                        &reverse.key,
                        id,
                        reporter,
                    );
                }
            }
        }
    }

    /// Writes a local to-one key, keeping a mirroring array on the target in
    /// step. `mirror_new` controls whether `fk`'s array gains `id`; the
    /// previous target's array always loses it.
    #[allow(clippy::too_many_arguments)]
    fn link_local_to_one(
        &self,
        owner: &Entity,
        relation: &Relation,
        target: &Entity,
        reverse_array: Option<&Relation>,
        id: &str,
        fk: &str,
        mirror_new: bool,
        reporter: &mut BenignErrorReporter,
    ) -> usize {
        if let Some(reverse) = reverse_array {
            let previous = match self.repo.get_record(owner, id) {
                Ok(Some(row)) => row.get(&relation.key).and_then(id_text),
                Ok(None) => {
                    report(reporter, owner, &relation.name, id, not_found(owner, id));
                    return 0;
                }
                Err(err) => {
                    report(reporter, owner, &relation.name, id, err);
                    return 0;
                }
            };
            let moved = [id.to_string()];
            if let Some(previous) = previous.filter(|previous| previous != fk) {
                self.edit_array(target, reverse, &previous, &moved, ArrayEdit::Remove, reporter);
            }
            if mirror_new {
                self.edit_array(target, reverse, fk, &moved, ArrayEdit::Add, reporter);
            }
        }
        self.write_scalar(owner, &relation.name, id, &relation.key, fk, reporter)
    }

    /// Read-modify-write of one foreign-key array. Returns 1 when written.
    fn edit_array(
        &self,
        storage: &Entity,
        relation: &Relation,
        row_id: &str,
        ids: &[RecordId],
        edit: ArrayEdit,
        reporter: &mut BenignErrorReporter,
    ) -> usize {
        let row = match self.repo.get_record(storage, row_id) {
            Ok(Some(row)) => row,
            Ok(None) => {
                report(reporter, storage, &relation.name, row_id, not_found(storage, row_id));
                return 0;
            }
            Err(err) => {
                report(reporter, storage, &relation.name, row_id, err);
                return 0;
            }
        };

        let current = ids_from_value(row.get(&relation.key));
        let next = match edit {
            ArrayEdit::Add => union_ids(&current, ids),
            ArrayEdit::Remove => difference_ids(&current, ids),
        };
        if next == current {
            return 0;
        }

        match self
            .repo
            .set_attribute(storage, row_id, &relation.key, &ids_to_value(&next))
        {
            Ok(affected) => affected,
            Err(err) => {
                report(reporter, storage, &relation.name, row_id, err);
                0
            }
        }
    }

    fn write_scalar(
        &self,
        storage: &Entity,
        relation: &str,
        row_id: &str,
        attribute: &str,
        value: &str,
        reporter: &mut BenignErrorReporter,
    ) -> usize {
        match self.repo.set_attribute(
            storage,
            row_id,
            attribute,
            &Value::String(value.to_string()),
        ) {
            Ok(0) => {
                report(reporter, storage, relation, row_id, not_found(storage, row_id));
                0
            }
            Ok(affected) => affected,
            Err(err) => {
                report(reporter, storage, relation, row_id, err);
                0
            }
        }
    }

    fn clear_scalar_if(
        &self,
        storage: &Entity,
        relation: &str,
        row_id: &str,
        attribute: &str,
        expected: &str,
        reporter: &mut BenignErrorReporter,
    ) -> usize {
        match self.repo.clear_attribute_if(
            storage,
            row_id,
            attribute,
            &Value::String(expected.to_string()),
        ) {
            Ok(0) => {
                debug!(
                    "event=association_clear module=association status=conflict_skipped entity={} relation={}",
                    storage.name, relation
                );
                0
            }
            Ok(affected) => affected,
            Err(err) => {
                report(reporter, storage, relation, row_id, err);
                0
            }
        }
    }
}

fn not_found(entity: &Entity, id: &str) -> RepoError {
    RepoError::NotFound {
        entity: entity.name.clone(),
        id: id.to_string(),
    }
}

fn report(
    reporter: &mut BenignErrorReporter,
    entity: &Entity,
    relation: &str,
    id: &str,
    error: RepoError,
) {
    let kind = match &error {
        RepoError::NotFound { .. } => BenignErrorKind::NotFound,
        RepoError::UnknownAttribute { .. } | RepoError::InvalidValue { .. } => {
            BenignErrorKind::Validation
        }
        RepoError::InvalidData(_) => BenignErrorKind::InvalidData,
        RepoError::Db(_) => BenignErrorKind::Storage,
    };
    warn!(
        "event=association_sync module=association status=error entity={} relation={} kind={:?}",
        entity.name, relation, kind
    );
    reporter.push(
        BenignError::new(kind, entity.name.clone(), error.to_string())
            .with_id(id)
            .with_relation(relation),
    );
}

fn log_sync(event: &str, entity: &str, relation: &str, affected: usize) {
    debug!(
        "event={event} module=association status=ok entity={entity} relation={relation} affected={affected}"
    );
}
