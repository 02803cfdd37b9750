//! Offset and cursor pagination over entity tables.
//!
//! # Responsibility
//! - Turn a search expression, an order and pagination arguments into at
//!   most two bounded scans.
//! - Build connection-style pages (`edges` + `page_info`).
//! - Scope a search to the records associated with one record through one
//!   relation.
//!
//! # Invariants
//! - Scans always run in a total order: the id attribute is appended
//!   ascending when the caller's order does not name it.
//! - Cursor anchors are strict: the anchor record never appears in the page
//!   it anchors.
//! - Edges are always returned in display order, also for `last` pages.
//! - An empty page reports both `has_previous_page` and `has_next_page` as
//!   false.
//! - Page size is clamped by `RecordLimit` before any scan runs.

use crate::codec::cursor::{decode_cursor, encode_cursor, CursorError};
use crate::codec::fk_array::ids_from_value;
use crate::codec::sql_value::scalar_to_sql;
use crate::collaborators::{LimitContext, RecordLimit};
use crate::model::entity::{AttributeType, Cardinality, Entity, KeysIn};
use crate::model::record::{id_text, Record};
use crate::model::registry::EntityRegistry;
use crate::repo::record_repo::{OrderField, RecordRepository, ScanRequest, SortDirection};
use crate::search::predicate::{quote_ident, translate, SearchExpression, StoragePredicate};
use crate::service::error::{EngineError, EngineResult};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Relay-style cursor pagination arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPagination {
    pub first: Option<u32>,
    pub after: Option<String>,
    pub last: Option<u32>,
    pub before: Option<String>,
}

impl CursorPagination {
    pub fn first(count: u32) -> Self {
        Self {
            first: Some(count),
            ..Self::default()
        }
    }

    pub fn last(count: u32) -> Self {
        Self {
            last: Some(count),
            ..Self::default()
        }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    pub fn before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub cursor: String,
    pub node: Record,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
    pub has_previous_page: bool,
    pub has_next_page: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CursorPage {
    pub edges: Vec<Edge>,
    pub page_info: PageInfo,
}

impl CursorPage {
    pub fn nodes(&self) -> impl Iterator<Item = &Record> {
        self.edges.iter().map(|edge| &edge.node)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Traversal {
    Forward,
    Backward,
}

impl Traversal {
    fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
        }
    }
}

/// Validated form of `CursorPagination`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageRequest<'a> {
    traversal: Traversal,
    limit: u32,
    anchor: Option<&'a str>,
}

/// Records reached from the `id` record of `entity` through `relation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationScope<'s> {
    pub entity: &'s str,
    pub relation: &'s str,
    pub id: &'s str,
}

impl<'s> AssociationScope<'s> {
    pub fn new(entity: &'s str, relation: &'s str, id: &'s str) -> Self {
        Self {
            entity,
            relation,
            id,
        }
    }
}

/// Pagination engine over a record repository.
pub struct PaginationEngine<'a, R: RecordRepository> {
    repo: &'a R,
    limits: &'a dyn RecordLimit,
}

impl<'a, R: RecordRepository> PaginationEngine<'a, R> {
    pub fn new(repo: &'a R, limits: &'a dyn RecordLimit) -> Self {
        Self { repo, limits }
    }

    /// Offset page in `order`, ties broken by id.
    ///
    /// # Errors
    /// - `Validation` when `limit` is 0 or an order field is not orderable.
    /// - `Search` when `search` does not translate.
    pub fn read_page(
        &self,
        entity: &Entity,
        search: Option<&SearchExpression>,
        order: &[OrderField],
        offset: u32,
        limit: u32,
    ) -> EngineResult<Vec<Record>> {
        if limit == 0 {
            return Err(EngineError::Validation(
                "limit must be greater than 0".to_string(),
            ));
        }
        let limit = self.limits.clamp_limit(
            limit,
            &LimitContext {
                entity: &entity.name,
                operation: "read_page",
            },
        );
        let filter = search_filter(entity, search)?;
        let order = total_order(entity, order)?;

        let records = self.repo.scan(
            entity,
            &ScanRequest {
                filter: &filter,
                order: &order,
                limit: Some(limit),
                offset,
            },
        )?;
        debug!(
            "event=read_page module=pagination status=ok entity={} offset={} limit={} returned={}",
            entity.name,
            offset,
            limit,
            records.len()
        );
        Ok(records)
    }

    /// Cursor page for `pagination` in `order`.
    ///
    /// # Errors
    /// - `Validation` for inconsistent `first`/`last`/`after`/`before`.
    /// - `InvalidCursor` when the anchor cursor does not decode.
    /// - `Search` when `search` does not translate.
    pub fn read_cursor_page(
        &self,
        entity: &Entity,
        search: Option<&SearchExpression>,
        order: &[OrderField],
        pagination: &CursorPagination,
    ) -> EngineResult<CursorPage> {
        let request = validate_pagination(pagination)?;
        let limit = self.limits.clamp_limit(
            request.limit,
            &LimitContext {
                entity: &entity.name,
                operation: "read_cursor_page",
            },
        );
        let filter = search_filter(entity, search)?;
        let order = total_order(entity, order)?;
        let scan_order = match request.traversal {
            Traversal::Forward => order,
            Traversal::Backward => reversed(&order),
        };

        let beyond_anchor = match request.anchor {
            Some(token) => {
                let anchor = decode_cursor(token)?;
                Some(after_anchor(entity, &scan_order, &anchor)?)
            }
            None => None,
        };

        let page_filter = match &beyond_anchor {
            Some(predicate) => filter.clone().and(predicate.clone()),
            None => filter.clone(),
        };
        let mut records = self.repo.scan(
            entity,
            &ScanRequest {
                filter: &page_filter,
                order: &scan_order,
                limit: Some(limit.saturating_add(1)),
                offset: 0,
            },
        )?;

        let has_more = records.len() > limit as usize;
        records.truncate(limit as usize);
        if request.traversal == Traversal::Backward {
            records.reverse();
        }

        if records.is_empty() {
            debug!(
                "event=cursor_page module=pagination status=ok entity={} direction={} limit={} returned=0",
                entity.name,
                request.traversal.as_str(),
                limit
            );
            return Ok(CursorPage::default());
        }

        let has_opposite = match beyond_anchor {
            Some(predicate) => self
                .repo
                .exists(entity, &filter.and(predicate.negate()))?,
            None => false,
        };
        let (has_previous_page, has_next_page) = match request.traversal {
            Traversal::Forward => (has_opposite, has_more),
            Traversal::Backward => (has_more, has_opposite),
        };

        let edges: Vec<Edge> = records
            .into_iter()
            .map(|node| Edge {
                cursor: encode_cursor(entity, &node),
                node,
            })
            .collect();
        let page_info = PageInfo {
            start_cursor: edges.first().map(|edge| edge.cursor.clone()),
            end_cursor: edges.last().map(|edge| edge.cursor.clone()),
            has_previous_page,
            has_next_page,
        };

        debug!(
            "event=cursor_page module=pagination status=ok entity={} direction={} limit={} returned={} has_previous={} has_next={}",
            entity.name,
            request.traversal.as_str(),
            limit,
            edges.len(),
            has_previous_page,
            has_next_page
        );
        Ok(CursorPage { edges, page_info })
    }

    /// Number of records matching `search`.
    pub fn count(&self, entity: &Entity, search: Option<&SearchExpression>) -> EngineResult<u64> {
        let filter = search_filter(entity, search)?;
        Ok(self.repo.count(entity, &filter)?)
    }

    /// `read_page` over the target entity of `scope`, limited to associated
    /// records.
    pub fn read_associated_page(
        &self,
        registry: &EntityRegistry,
        scope: &AssociationScope<'_>,
        search: Option<&SearchExpression>,
        order: &[OrderField],
        offset: u32,
        limit: u32,
    ) -> EngineResult<Vec<Record>> {
        let (target, search) = self.association_search(registry, scope, search)?;
        self.read_page(target, Some(&search), order, offset, limit)
    }

    /// `read_cursor_page` over the target entity of `scope`, limited to
    /// associated records.
    pub fn read_associated_cursor_page(
        &self,
        registry: &EntityRegistry,
        scope: &AssociationScope<'_>,
        search: Option<&SearchExpression>,
        order: &[OrderField],
        pagination: &CursorPagination,
    ) -> EngineResult<CursorPage> {
        let (target, search) = self.association_search(registry, scope, search)?;
        self.read_cursor_page(target, Some(&search), order, pagination)
    }

    pub fn count_associated_filtered(
        &self,
        registry: &EntityRegistry,
        scope: &AssociationScope<'_>,
        search: Option<&SearchExpression>,
    ) -> EngineResult<u64> {
        let (target, search) = self.association_search(registry, scope, search)?;
        self.count(target, Some(&search))
    }

    /// Caller search ANDed with the relation restriction on the target entity.
    ///
    /// # Errors
    /// - `Schema` for an unknown entity or relation.
    /// - `NotFound` when the scoping record does not exist.
    fn association_search<'r>(
        &self,
        registry: &'r EntityRegistry,
        scope: &AssociationScope<'_>,
        search: Option<&SearchExpression>,
    ) -> EngineResult<(&'r Entity, SearchExpression)> {
        let owner = registry.entity(scope.entity)?;
        let relation = registry.relation(scope.entity, scope.relation)?;
        let target = registry.entity(&relation.target)?;
        let record = self
            .repo
            .get_record(owner, scope.id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: owner.name.clone(),
                ids: vec![scope.id.to_string()],
            })?;

        let restriction = match (relation.keys_in, relation.cardinality) {
            (KeysIn::Foreign, _) => {
                SearchExpression::references(target, &relation.key, scope.id)
            }
            (KeysIn::Local, Cardinality::ToMany) => SearchExpression::one_of(
                target.id_attribute.clone(),
                Value::from(ids_from_value(record.get(&relation.key))),
            ),
            (KeysIn::Local, Cardinality::ToOne) => {
                let linked: Vec<String> =
                    record.get(&relation.key).and_then(id_text).into_iter().collect();
                SearchExpression::one_of(target.id_attribute.clone(), Value::from(linked))
            }
        };
        debug!(
            "event=association_scope module=pagination status=ok entity={} relation={} target={}",
            owner.name, relation.name, target.name
        );
        Ok((target, SearchExpression::scoped(search, restriction)))
    }
}

fn validate_pagination(pagination: &CursorPagination) -> EngineResult<PageRequest<'_>> {
    match (pagination.first, pagination.last) {
        (Some(_), Some(_)) => invalid("`first` and `last` cannot be combined"),
        (None, None) => invalid("one of `first` or `last` is required"),
        (Some(0), None) | (None, Some(0)) => invalid("`first`/`last` must be greater than 0"),
        (Some(_), None) if pagination.before.is_some() => {
            invalid("`before` can only be used with `last`")
        }
        (None, Some(_)) if pagination.after.is_some() => {
            invalid("`after` can only be used with `first`")
        }
        (Some(first), None) => Ok(PageRequest {
            traversal: Traversal::Forward,
            limit: first,
            anchor: pagination.after.as_deref(),
        }),
        (None, Some(last)) => Ok(PageRequest {
            traversal: Traversal::Backward,
            limit: last,
            anchor: pagination.before.as_deref(),
        }),
    }
}

fn invalid<T>(message: &str) -> EngineResult<T> {
    Err(EngineError::Validation(message.to_string()))
}

fn search_filter(
    entity: &Entity,
    search: Option<&SearchExpression>,
) -> EngineResult<StoragePredicate> {
    match search {
        Some(search) => Ok(translate(search, entity)?),
        None => Ok(StoragePredicate::always()),
    }
}

/// Caller order plus the id attribute ascending, when not already present.
fn total_order(entity: &Entity, order: &[OrderField]) -> EngineResult<Vec<OrderField>> {
    let mut total = Vec::with_capacity(order.len() + 1);
    for term in order {
        match entity.attribute_type(&term.field) {
            Some(AttributeType::Scalar(_)) => {}
            Some(AttributeType::Array(_)) => {
                return Err(EngineError::Validation(format!(
                    "cannot order by array attribute `{}`",
                    term.field
                )))
            }
            None => {
                return Err(EngineError::Validation(format!(
                    "entity `{}` has no attribute `{}` to order by",
                    entity.name, term.field
                )))
            }
        }
        if !total.iter().any(|seen: &OrderField| seen.field == term.field) {
            total.push(term.clone());
        }
    }
    if !total.iter().any(|term| term.field == entity.id_attribute) {
        total.push(OrderField::asc(entity.id_attribute.clone()));
    }
    Ok(total)
}

fn reversed(order: &[OrderField]) -> Vec<OrderField> {
    order
        .iter()
        .map(|term| OrderField {
            field: term.field.clone(),
            direction: term.direction.reversed(),
        })
        .collect()
}

/// Rows strictly after `anchor` in `order`.
///
/// Lexicographic over the order tuple. NULL sorts first ascending and last
/// descending, as SQLite orders them. Every fragment evaluates to 0 or 1,
/// never NULL, so the result can be negated.
fn after_anchor(
    entity: &Entity,
    order: &[OrderField],
    anchor: &Record,
) -> EngineResult<StoragePredicate> {
    let mut alternatives = Vec::with_capacity(order.len());
    let mut equal_prefix = StoragePredicate::always();

    for term in order {
        let kind = entity
            .attribute_type(&term.field)
            .map(AttributeType::scalar)
            .ok_or_else(|| {
                EngineError::Validation(format!("unknown order field `{}`", term.field))
            })?;
        let raw = anchor.get(&term.field).unwrap_or(&Value::Null);
        let bound = scalar_to_sql(kind, raw).map_err(|message| {
            EngineError::InvalidCursor(CursorError::InvalidJson(format!(
                "field `{}`: {message}",
                term.field
            )))
        })?;
        let column = quote_ident(&term.field);
        let is_null = raw.is_null();

        let strictly_after = match (term.direction, is_null) {
            (SortDirection::Asc, true) => {
                StoragePredicate::new(format!("{column} IS NOT NULL"), vec![])
            }
            (SortDirection::Asc, false) => StoragePredicate::new(
                format!("{column} IS NOT NULL AND {column} > ?"),
                vec![bound.clone()],
            ),
            (SortDirection::Desc, true) => StoragePredicate::never(),
            (SortDirection::Desc, false) => StoragePredicate::new(
                format!("{column} IS NULL OR {column} < ?"),
                vec![bound.clone()],
            ),
        };
        alternatives.push(equal_prefix.clone().and(strictly_after));

        let equal = if is_null {
            StoragePredicate::new(format!("{column} IS NULL"), vec![])
        } else {
            StoragePredicate::new(
                format!("{column} IS NOT NULL AND {column} = ?"),
                vec![bound],
            )
        };
        equal_prefix = equal_prefix.and(equal);
    }

    Ok(alternatives
        .into_iter()
        .reduce(StoragePredicate::or)
        .unwrap_or_else(StoragePredicate::never))
}

#[cfg(test)]
mod tests {
    use super::{after_anchor, total_order, validate_pagination, CursorPagination, Traversal};
    use crate::model::entity::{AttributeType, Entity, ScalarType};
    use crate::model::record::Record;
    use crate::repo::record_repo::OrderField;
    use crate::service::error::EngineError;
    use rusqlite::types::Value as SqlValue;

    fn study() -> Entity {
        Entity::new("study", "study_id", ScalarType::String)
            .attribute("year", AttributeType::Scalar(ScalarType::Int))
            .attribute("tags", AttributeType::Array(ScalarType::String))
    }

    #[test]
    fn pagination_arguments_are_validated() {
        let cases = [
            CursorPagination::default(),
            CursorPagination {
                first: Some(2),
                last: Some(2),
                ..CursorPagination::default()
            },
            CursorPagination::first(0),
            CursorPagination::first(2).before("x"),
            CursorPagination::last(2).after("x"),
        ];
        for case in &cases {
            assert!(
                matches!(validate_pagination(case), Err(EngineError::Validation(_))),
                "expected validation error for {case:?}"
            );
        }

        let backward = CursorPagination::last(3).before("c");
        let request = validate_pagination(&backward).unwrap();
        assert_eq!(request.traversal, Traversal::Backward);
        assert_eq!(request.limit, 3);
        assert_eq!(request.anchor, Some("c"));
    }

    #[test]
    fn total_order_appends_id_and_rejects_array_fields() {
        let order = total_order(&study(), &[OrderField::desc("year")]).unwrap();
        assert_eq!(
            order,
            vec![OrderField::desc("year"), OrderField::asc("study_id")]
        );

        let explicit = total_order(&study(), &[OrderField::desc("study_id")]).unwrap();
        assert_eq!(explicit, vec![OrderField::desc("study_id")]);

        assert!(matches!(
            total_order(&study(), &[OrderField::asc("tags")]),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn after_anchor_builds_null_aware_tuple_comparison() {
        let order = [OrderField::asc("year"), OrderField::asc("study_id")];
        let anchor = Record::new().with("study_id", "s2").with("year", 2020);

        let predicate = after_anchor(&study(), &order, &anchor).unwrap();
        assert_eq!(
            predicate.params,
            vec![
                SqlValue::Integer(2020),
                SqlValue::Integer(2020),
                SqlValue::Text("s2".to_string()),
            ]
        );
        assert!(predicate.sql.contains("\"year\" IS NOT NULL AND \"year\" > ?"));
        assert!(predicate.sql.contains("\"study_id\" IS NOT NULL AND \"study_id\" > ?"));
    }

    #[test]
    fn after_anchor_with_null_descending_value_matches_only_equal_prefix() {
        let order = [OrderField::desc("year"), OrderField::asc("study_id")];
        let anchor = Record::new().with("study_id", "s2");

        let predicate = after_anchor(&study(), &order, &anchor).unwrap();
        assert!(predicate.sql.contains("1 = 0"));
        assert!(predicate.sql.contains("\"year\" IS NULL"));
        assert_eq!(predicate.params, vec![SqlValue::Text("s2".to_string())]);
    }
}
