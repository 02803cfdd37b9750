mod common;

use common::{insert, registry};
use entity_engine_core::db::open_db_in_memory;
use entity_engine_core::{
    AssociationScope, ConfiguredRecordLimit, CursorPage, CursorPagination, EngineError,
    EntityRegistry, Operator, OrderField, PaginationEngine, Record, RecordRepository,
    SearchExpression, SqliteRecordRepository,
};
use serde_json::{json, Value};

const LIMITS: ConfiguredRecordLimit = ConfiguredRecordLimit {
    max_records: 100,
    default_page_size: 20,
};

fn seed(repo: &SqliteRecordRepository<'_>, registry: &EntityRegistry) {
    let rows: [(&str, Option<i64>, &str); 5] = [
        ("s1", Some(2020), "pr1"),
        ("s2", None, "pr2"),
        ("s3", Some(2019), "pr1"),
        ("s4", None, "pr1"),
        ("s5", Some(2021), "pr2"),
    ];
    for (id, year, protocol) in rows {
        let record = Record::new()
            .with("study_id", id)
            .with("title", format!("title {id}"))
            .with("year", year.map(Value::from).unwrap_or(Value::Null))
            .with("protocol_id", protocol);
        insert(repo, registry, "study", record).unwrap();
    }
}

fn record_ids(records: &[Record], id_attribute: &str) -> Vec<String> {
    records
        .iter()
        .map(|record| record.get(id_attribute).unwrap().as_str().unwrap().to_string())
        .collect()
}

fn page_ids(page: &CursorPage) -> Vec<String> {
    page.nodes()
        .map(|node| node.get("study_id").unwrap().as_str().unwrap().to_string())
        .collect()
}

#[test]
fn forward_pages_walk_the_total_order() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    seed(&repo, &registry);
    let engine = PaginationEngine::new(&repo, &LIMITS);
    let study = registry.entity("study").unwrap();
    let order = [OrderField::asc("title")];

    let first = engine
        .read_cursor_page(study, None, &order, &CursorPagination::first(2))
        .unwrap();
    assert_eq!(page_ids(&first), ["s1", "s2"]);
    assert!(!first.page_info.has_previous_page);
    assert!(first.page_info.has_next_page);
    assert_eq!(first.page_info.start_cursor, Some(first.edges[0].cursor.clone()));

    let middle = engine
        .read_cursor_page(
            study,
            None,
            &order,
            &CursorPagination::first(2).after(first.page_info.end_cursor.clone().unwrap()),
        )
        .unwrap();
    assert_eq!(page_ids(&middle), ["s3", "s4"]);
    assert!(middle.page_info.has_previous_page);
    assert!(middle.page_info.has_next_page);

    let last = engine
        .read_cursor_page(
            study,
            None,
            &order,
            &CursorPagination::first(2).after(middle.page_info.end_cursor.clone().unwrap()),
        )
        .unwrap();
    assert_eq!(page_ids(&last), ["s5"]);
    assert!(last.page_info.has_previous_page);
    assert!(!last.page_info.has_next_page);
}

#[test]
fn backward_pages_mirror_forward_pages() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    seed(&repo, &registry);
    let engine = PaginationEngine::new(&repo, &LIMITS);
    let study = registry.entity("study").unwrap();
    let order = [OrderField::asc("title")];

    let tail = engine
        .read_cursor_page(study, None, &order, &CursorPagination::last(2))
        .unwrap();
    assert_eq!(page_ids(&tail), ["s4", "s5"]);
    assert!(tail.page_info.has_previous_page);
    assert!(!tail.page_info.has_next_page);

    let middle = engine
        .read_cursor_page(
            study,
            None,
            &order,
            &CursorPagination::last(2).before(tail.page_info.start_cursor.clone().unwrap()),
        )
        .unwrap();
    assert_eq!(page_ids(&middle), ["s2", "s3"]);
    assert!(middle.page_info.has_previous_page);
    assert!(middle.page_info.has_next_page);

    let head = engine
        .read_cursor_page(
            study,
            None,
            &order,
            &CursorPagination::last(2).before(middle.page_info.start_cursor.clone().unwrap()),
        )
        .unwrap();
    assert_eq!(page_ids(&head), ["s1"]);
    assert!(!head.page_info.has_previous_page);
    assert!(head.page_info.has_next_page);
}

#[test]
fn backward_from_a_start_cursor_returns_the_previous_forward_page() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    seed(&repo, &registry);
    let engine = PaginationEngine::new(&repo, &LIMITS);
    let study = registry.entity("study").unwrap();

    for order in [vec![OrderField::asc("year")], vec![OrderField::desc("title")]] {
        let mut forward = Vec::new();
        let mut pagination = CursorPagination::first(2);
        loop {
            let page = engine
                .read_cursor_page(study, None, &order, &pagination)
                .unwrap();
            let end = page.page_info.end_cursor.clone().unwrap();
            let more = page.page_info.has_next_page;
            forward.push(page);
            if !more {
                break;
            }
            pagination = CursorPagination::first(2).after(end);
        }
        assert_eq!(forward.len(), 3);

        for k in 1..forward.len() {
            let start = forward[k].page_info.start_cursor.clone().unwrap();
            let back = engine
                .read_cursor_page(study, None, &order, &CursorPagination::last(2).before(start))
                .unwrap();
            assert_eq!(page_ids(&back), page_ids(&forward[k - 1]), "{order:?} page {k}");
            assert_eq!(back.page_info.start_cursor, forward[k - 1].page_info.start_cursor);
            assert_eq!(back.page_info.has_previous_page, k > 1);
            assert!(back.page_info.has_next_page);
        }
    }
}

#[test]
fn null_values_sort_first_ascending_and_last_descending() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    seed(&repo, &registry);
    let engine = PaginationEngine::new(&repo, &LIMITS);
    let study = registry.entity("study").unwrap();

    for (order, expected) in [
        (OrderField::asc("year"), ["s2", "s4", "s3", "s1", "s5"]),
        (OrderField::desc("year"), ["s5", "s1", "s3", "s2", "s4"]),
    ] {
        let order = [order];
        let mut seen = Vec::new();
        let mut pagination = CursorPagination::first(2);
        loop {
            let page = engine
                .read_cursor_page(study, None, &order, &pagination)
                .unwrap();
            seen.extend(page_ids(&page));
            if !page.page_info.has_next_page {
                break;
            }
            pagination = CursorPagination::first(2).after(page.page_info.end_cursor.unwrap());
        }
        assert_eq!(seen, expected);
    }
}

#[test]
fn search_scopes_cursor_pages() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    seed(&repo, &registry);
    let engine = PaginationEngine::new(&repo, &LIMITS);
    let study = registry.entity("study").unwrap();
    let search = SearchExpression::eq("protocol_id", "pr1");

    let page = engine
        .read_cursor_page(
            study,
            Some(&search),
            &[OrderField::desc("title")],
            &CursorPagination::first(5),
        )
        .unwrap();
    assert_eq!(page_ids(&page), ["s4", "s3", "s1"]);
    assert!(!page.page_info.has_next_page);
    assert_eq!(engine.count(study, Some(&search)).unwrap(), 3);
}

#[test]
fn empty_result_has_no_cursors_or_neighbours() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    seed(&repo, &registry);
    let engine = PaginationEngine::new(&repo, &LIMITS);
    let study = registry.entity("study").unwrap();
    let search = SearchExpression::eq("protocol_id", "missing");

    let page = engine
        .read_cursor_page(study, Some(&search), &[], &CursorPagination::first(3))
        .unwrap();
    assert!(page.edges.is_empty());
    assert_eq!(page.page_info.start_cursor, None);
    assert_eq!(page.page_info.end_cursor, None);
    assert!(!page.page_info.has_previous_page);
    assert!(!page.page_info.has_next_page);

    let first = engine
        .read_cursor_page(study, None, &[], &CursorPagination::last(1))
        .unwrap();
    let past_the_end = engine
        .read_cursor_page(
            study,
            None,
            &[],
            &CursorPagination::first(3).after(first.page_info.end_cursor.unwrap()),
        )
        .unwrap();
    assert!(past_the_end.edges.is_empty());
    assert!(!past_the_end.page_info.has_previous_page);
}

#[test]
fn limits_are_clamped_to_the_record_limit() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    seed(&repo, &registry);
    let limits = ConfiguredRecordLimit {
        max_records: 3,
        default_page_size: 2,
    };
    let engine = PaginationEngine::new(&repo, &limits);
    let study = registry.entity("study").unwrap();

    let page = engine
        .read_cursor_page(study, None, &[], &CursorPagination::first(50))
        .unwrap();
    assert_eq!(page.edges.len(), 3);
    assert!(page.page_info.has_next_page);

    let offset_page = engine.read_page(study, None, &[], 1, 50).unwrap();
    assert_eq!(offset_page.len(), 3);
    assert_eq!(offset_page[0].get("study_id"), Some(&Value::from("s2")));

    let zero = ConfiguredRecordLimit {
        max_records: 0,
        default_page_size: 0,
    };
    let page = PaginationEngine::new(&repo, &zero)
        .read_cursor_page(study, None, &[], &CursorPagination::first(5))
        .unwrap();
    assert_eq!(page_ids(&page), ["s1"]);
    assert!(page.page_info.has_next_page);
}

#[test]
fn malformed_requests_are_rejected() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    let engine = PaginationEngine::new(&repo, &LIMITS);
    let study = registry.entity("study").unwrap();

    let bad_cursor = engine
        .read_cursor_page(
            study,
            None,
            &[],
            &CursorPagination::first(2).after("not-base64-json"),
        )
        .unwrap_err();
    assert!(matches!(bad_cursor, EngineError::InvalidCursor(_)));
    assert!(bad_cursor.is_client_error());

    let both = CursorPagination {
        first: Some(1),
        last: Some(1),
        ..CursorPagination::default()
    };
    let mixed_directions = [
        both,
        CursorPagination::first(0),
        CursorPagination::first(2).before("x"),
        CursorPagination::last(2).after("x"),
        CursorPagination::default(),
    ];
    for pagination in mixed_directions {
        let err = engine
            .read_cursor_page(study, None, &[], &pagination)
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "{pagination:?}");
    }

    let array_order = engine
        .read_cursor_page(
            study,
            None,
            &[OrderField::asc("publication_ids")],
            &CursorPagination::first(1),
        )
        .unwrap_err();
    assert!(matches!(array_order, EngineError::Validation(_)));

    let zero_limit = engine.read_page(study, None, &[], 0, 0).unwrap_err();
    assert!(matches!(zero_limit, EngineError::Validation(_)));
}

#[test]
fn foreign_key_scope_pages_the_referencing_rows() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    seed(&repo, &registry);
    insert(&repo, &registry, "protocol", Record::new().with("protocol_id", "pr1")).unwrap();
    let engine = PaginationEngine::new(&repo, &LIMITS);
    let scope = AssociationScope::new("protocol", "studies", "pr1");
    let order = [OrderField::desc("title")];

    let first = engine
        .read_associated_cursor_page(&registry, &scope, None, &order, &CursorPagination::first(2))
        .unwrap();
    assert_eq!(page_ids(&first), ["s4", "s3"]);
    assert!(first.page_info.has_next_page);

    let rest = engine
        .read_associated_cursor_page(
            &registry,
            &scope,
            None,
            &order,
            &CursorPagination::first(2).after(first.page_info.end_cursor.unwrap()),
        )
        .unwrap();
    assert_eq!(page_ids(&rest), ["s1"]);
    assert!(rest.page_info.has_previous_page);
    assert!(!rest.page_info.has_next_page);

    let recent = SearchExpression::leaf("year", Operator::Gte, 2019);
    assert_eq!(
        engine
            .count_associated_filtered(&registry, &scope, Some(&recent))
            .unwrap(),
        2
    );
    let study = registry.entity("study").unwrap();
    assert_eq!(engine.count(study, Some(&recent)).unwrap(), 3);
}

#[test]
fn local_array_scope_reads_the_listed_ids() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    seed(&repo, &registry);
    for (id, title) in [("p1", "alpha"), ("p2", "beta"), ("p3", "gamma")] {
        let record = Record::new().with("publication_id", id).with("title", title);
        insert(&repo, &registry, "publication", record).unwrap();
    }
    let linked = Record::new().with("publication_ids", json!(["p3", "p1"]));
    repo.update_record(registry.entity("study").unwrap(), "s1", &linked)
        .unwrap();
    let engine = PaginationEngine::new(&repo, &LIMITS);
    let scope = AssociationScope::new("study", "publications", "s1");

    let all = engine
        .read_associated_page(&registry, &scope, None, &[], 0, 10)
        .unwrap();
    assert_eq!(record_ids(&all, "publication_id"), ["p1", "p3"]);

    let search = SearchExpression::leaf("title", Operator::Like, "g%");
    let filtered = engine
        .read_associated_page(&registry, &scope, Some(&search), &[], 0, 10)
        .unwrap();
    assert_eq!(record_ids(&filtered, "publication_id"), ["p3"]);

    let unlinked = AssociationScope::new("study", "publications", "s2");
    assert_eq!(
        engine
            .count_associated_filtered(&registry, &unlinked, None)
            .unwrap(),
        0
    );
}

#[test]
fn local_to_one_scope_reads_the_referenced_row() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    seed(&repo, &registry);
    for (id, name) in [("pr1", "first"), ("pr2", "second")] {
        let record = Record::new().with("protocol_id", id).with("name", name);
        insert(&repo, &registry, "protocol", record).unwrap();
    }
    let engine = PaginationEngine::new(&repo, &LIMITS);
    let scope = AssociationScope::new("study", "protocol", "s2");

    let page = engine
        .read_associated_cursor_page(&registry, &scope, None, &[], &CursorPagination::first(5))
        .unwrap();
    let protocols: Vec<&Value> = page
        .nodes()
        .map(|node| node.get("protocol_id").unwrap())
        .collect();
    assert_eq!(protocols, [&Value::from("pr2")]);
    assert!(!page.page_info.has_next_page);

    let other_name = SearchExpression::eq("name", "first");
    assert_eq!(
        engine
            .count_associated_filtered(&registry, &scope, Some(&other_name))
            .unwrap(),
        0
    );
}

#[test]
fn association_scope_requires_a_known_record_and_relation() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    seed(&repo, &registry);
    let engine = PaginationEngine::new(&repo, &LIMITS);

    let absent = AssociationScope::new("protocol", "studies", "pr9");
    let missing = engine
        .count_associated_filtered(&registry, &absent, None)
        .unwrap_err();
    match missing {
        EngineError::NotFound { entity, ids } => {
            assert_eq!(entity, "protocol");
            assert_eq!(ids, ["pr9"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let undeclared = AssociationScope::new("study", "reviewers", "s1");
    let unknown = engine
        .count_associated_filtered(&registry, &undeclared, None)
        .unwrap_err();
    assert!(matches!(unknown, EngineError::Schema(_)));
}
