mod common;

use common::{ids, insert, load, owned, registry, text};
use entity_engine_core::db::open_db_in_memory;
use entity_engine_core::{
    Action, AssociationEdits, AssociationScope, Authorizer, ClearAssociationsHook, Collaborators,
    ConfiguredRecordLimit, CursorPagination, EngineError, Entity, EntityService, OrderField,
    Principal, Record, RepositoryExistenceChecker, SqliteRecordRepository, ValidationError,
    ValidationPhase, ValidationTarget, Validator,
};
use serde_json::Value;

struct ReadOnly;

impl Authorizer for ReadOnly {
    fn is_authorized(&self, _principal: &Principal, _entity: &Entity, action: Action) -> bool {
        action == Action::Read
    }
}

struct HiddenProtocols;

impl Authorizer for HiddenProtocols {
    fn is_authorized(&self, _principal: &Principal, entity: &Entity, _action: Action) -> bool {
        entity.name != "protocol"
    }
}

struct RequireTitle;

impl Validator for RequireTitle {
    fn validate(
        &self,
        phase: ValidationPhase,
        _entity: &Entity,
        target: ValidationTarget<'_>,
    ) -> Result<(), ValidationError> {
        match (phase, target) {
            (ValidationPhase::Create, ValidationTarget::Record(record))
                if !record.contains("title") =>
            {
                Err(ValidationError::new("title is required"))
            }
            _ => Ok(()),
        }
    }
}

fn principal() -> Principal {
    Principal::new("curator").with_role("editor")
}

#[test]
fn create_applies_association_edits() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    insert(&repo, &registry, "protocol", Record::new().with("protocol_id", "pr1")).unwrap();
    insert(&repo, &registry, "publication", Record::new().with("publication_id", "p1")).unwrap();

    let checker = RepositoryExistenceChecker::new(&repo);
    let limits = ConfiguredRecordLimit::default();
    let service = EntityService::new(
        &registry,
        SqliteRecordRepository::new(&conn),
        Collaborators::new(&checker, &limits),
    );

    let edits = AssociationEdits::new()
        .add("protocol", &["pr1"])
        .add("publications", &["p1"]);
    let outcome = service
        .create(
            &principal(),
            "study",
            &Record::new().with("title", "Soil survey"),
            &edits,
        )
        .unwrap();

    assert!(outcome.is_clean());
    let id = text(&outcome.record, "study_id").unwrap();
    assert_eq!(text(&outcome.record, "protocol_id").as_deref(), Some("pr1"));
    assert_eq!(ids(&outcome.record, "publication_ids"), owned(&["p1"]));
    assert_eq!(
        ids(&load(&repo, &registry, "publication", "p1"), "study_ids"),
        vec![id.clone()]
    );
    assert_eq!(service.read_one(&principal(), "study", &id).unwrap(), outcome.record);
}

#[test]
fn create_rejects_bad_edits_before_writing() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    let checker = RepositoryExistenceChecker::new(&repo);
    let limits = ConfiguredRecordLimit::default();
    let service = EntityService::new(
        &registry,
        SqliteRecordRepository::new(&conn),
        Collaborators::new(&checker, &limits),
    );
    let record = Record::new().with("study_id", "s1");

    let missing = service
        .create(
            &principal(),
            "study",
            &record,
            &AssociationEdits::new().add("publications", &["ghost"]),
        )
        .unwrap_err();
    match missing {
        EngineError::NotFound { entity, ids } => {
            assert_eq!(entity, "publication");
            assert_eq!(ids, owned(&["ghost"]));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let invalid = [
        AssociationEdits::new().remove("publications", &["p1"]),
        AssociationEdits::new().add("protocol", &["pr1", "pr2"]),
        AssociationEdits::new().add("reviewers", &["r1"]),
    ];
    for edits in invalid {
        let err = service
            .create(&principal(), "study", &record, &edits)
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "{edits:?}");
    }

    assert_eq!(service.count(&principal(), "study", None).unwrap(), 0);
}

#[test]
fn update_removes_before_adding() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    for id in ["p1", "p2"] {
        insert(&repo, &registry, "publication", Record::new().with("publication_id", id)).unwrap();
    }
    let checker = RepositoryExistenceChecker::new(&repo);
    let limits = ConfiguredRecordLimit::default();
    let service = EntityService::new(
        &registry,
        SqliteRecordRepository::new(&conn),
        Collaborators::new(&checker, &limits),
    );
    service
        .create(
            &principal(),
            "study",
            &Record::new().with("study_id", "s1").with("title", "draft"),
            &AssociationEdits::new().add("publications", &["p1"]),
        )
        .unwrap();

    let outcome = service
        .update(
            &principal(),
            "study",
            "s1",
            &Record::new().with("title", "final"),
            &AssociationEdits::new()
                .remove("publications", &["p1"])
                .add("publications", &["p2"]),
        )
        .unwrap();

    assert!(outcome.is_clean());
    assert_eq!(text(&outcome.record, "title").as_deref(), Some("final"));
    assert_eq!(ids(&outcome.record, "publication_ids"), owned(&["p2"]));
    assert!(ids(&load(&repo, &registry, "publication", "p1"), "study_ids").is_empty());
    assert_eq!(
        ids(&load(&repo, &registry, "publication", "p2"), "study_ids"),
        owned(&["s1"])
    );

    let missing = service
        .update(
            &principal(),
            "study",
            "nope",
            &Record::new().with("title", "x"),
            &AssociationEdits::new(),
        )
        .unwrap_err();
    assert!(matches!(missing, EngineError::NotFound { .. }));
}

#[test]
fn delete_is_guarded_and_returns_the_old_record() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    insert(&repo, &registry, "protocol", Record::new().with("protocol_id", "pr1")).unwrap();
    insert(
        &repo,
        &registry,
        "study",
        Record::new().with("study_id", "s1").with("protocol_id", "pr1"),
    )
    .unwrap();
    insert(&repo, &registry, "study", Record::new().with("study_id", "s2")).unwrap();

    let checker = RepositoryExistenceChecker::new(&repo);
    let limits = ConfiguredRecordLimit::default();
    let service = EntityService::new(
        &registry,
        SqliteRecordRepository::new(&conn),
        Collaborators::new(&checker, &limits),
    );

    let blocked = service.delete(&principal(), "protocol", "pr1").unwrap_err();
    assert!(matches!(blocked, EngineError::DependentRecordsExist { .. }));
    assert!(blocked.is_client_error());

    let outcome = service.delete(&principal(), "study", "s2").unwrap();
    assert_eq!(text(&outcome.record, "study_id").as_deref(), Some("s2"));
    let gone = service.read_one(&principal(), "study", "s2").unwrap_err();
    assert!(matches!(gone, EngineError::NotFound { .. }));

    let again = service.delete(&principal(), "study", "s2").unwrap_err();
    assert!(matches!(again, EngineError::NotFound { .. }));
}

#[test]
fn delete_runs_the_configured_hook() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    insert(&repo, &registry, "dataset", Record::new().with("dataset_id", "d1")).unwrap();
    insert(&repo, &registry, "datafile", Record::new().with("datafile_id", "f1")).unwrap();

    let checker = RepositoryExistenceChecker::new(&repo);
    let limits = ConfiguredRecordLimit::default();
    let hook = ClearAssociationsHook::new(&registry, &repo);
    let service = EntityService::new(
        &registry,
        SqliteRecordRepository::new(&conn),
        Collaborators::new(&checker, &limits).with_deletion_hook(&hook),
    );
    service
        .update(
            &principal(),
            "dataset",
            "d1",
            &Record::new().with("name", "raw"),
            &AssociationEdits::new().add("datafiles", &["f1"]),
        )
        .unwrap();
    assert_eq!(
        text(&load(&repo, &registry, "datafile", "f1"), "dataset_id").as_deref(),
        Some("d1")
    );

    let outcome = service.delete(&principal(), "dataset", "d1").unwrap();

    assert!(outcome.is_clean());
    assert_eq!(ids(&outcome.record, "datafile_ids"), owned(&["f1"]));
    assert_eq!(text(&load(&repo, &registry, "datafile", "f1"), "dataset_id"), None);
}

#[test]
fn collaborators_gate_every_operation() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    insert(&repo, &registry, "study", Record::new().with("study_id", "s1")).unwrap();

    let checker = RepositoryExistenceChecker::new(&repo);
    let limits = ConfiguredRecordLimit::default();
    let read_only = EntityService::new(
        &registry,
        SqliteRecordRepository::new(&conn),
        Collaborators::new(&checker, &limits).with_authorizer(&ReadOnly),
    );
    read_only.read_one(&principal(), "study", "s1").unwrap();
    match read_only
        .delete(&principal(), "study", "s1")
        .unwrap_err()
    {
        EngineError::Unauthorized { entity, action } => {
            assert_eq!(entity, "study");
            assert_eq!(action, "delete");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let validated = EntityService::new(
        &registry,
        SqliteRecordRepository::new(&conn),
        Collaborators::new(&checker, &limits).with_validator(&RequireTitle),
    );
    let err = validated
        .create(
            &principal(),
            "study",
            &Record::new().with("study_id", "s2"),
            &AssociationEdits::new(),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let unknown = validated
        .read_one(&principal(), "reviewer", "r1")
        .unwrap_err();
    assert!(matches!(unknown, EngineError::Schema(_)));
    assert!(!unknown.is_client_error());
}

#[test]
fn reads_fall_back_to_the_default_page_size() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    for id in ["s1", "s2", "s3"] {
        insert(&repo, &registry, "study", Record::new().with("study_id", id)).unwrap();
    }

    let checker = RepositoryExistenceChecker::new(&repo);
    let limits = ConfiguredRecordLimit {
        max_records: 100,
        default_page_size: 2,
    };
    let service = EntityService::new(
        &registry,
        SqliteRecordRepository::new(&conn),
        Collaborators::new(&checker, &limits),
    );

    let page = service
        .read_cursor_page(
            &Principal::anonymous(),
            "study",
            None,
            &[OrderField::desc("study_id")],
            &CursorPagination::default(),
        )
        .unwrap();
    let seen: Vec<Value> = page
        .nodes()
        .map(|node| node.get("study_id").cloned().unwrap())
        .collect();
    assert_eq!(seen, vec![Value::from("s3"), Value::from("s2")]);
    assert!(page.page_info.has_next_page);

    let offset_page = service
        .read_page(&Principal::anonymous(), "study", None, &[], 2, None)
        .unwrap();
    assert_eq!(offset_page.len(), 1);
    assert_eq!(service.count(&Principal::anonymous(), "study", None).unwrap(), 3);
}

#[test]
fn associated_reads_check_both_entities() {
    let registry = registry();
    let conn = open_db_in_memory(&registry).unwrap();
    let repo = SqliteRecordRepository::new(&conn);
    insert(&repo, &registry, "protocol", Record::new().with("protocol_id", "pr1")).unwrap();
    for id in ["s1", "s2", "s3"] {
        let record = Record::new().with("study_id", id).with("protocol_id", "pr1");
        insert(&repo, &registry, "study", record).unwrap();
    }

    let checker = RepositoryExistenceChecker::new(&repo);
    let limits = ConfiguredRecordLimit {
        max_records: 100,
        default_page_size: 2,
    };
    let service = EntityService::new(
        &registry,
        SqliteRecordRepository::new(&conn),
        Collaborators::new(&checker, &limits),
    );
    let studies = AssociationScope::new("protocol", "studies", "pr1");

    let page = service
        .read_associated_cursor_page(
            &principal(),
            &studies,
            None,
            &[],
            &CursorPagination::default(),
        )
        .unwrap();
    assert_eq!(page.edges.len(), 2);
    assert!(page.page_info.has_next_page);
    let offset_page = service
        .read_associated_page(&principal(), &studies, None, &[], 2, None)
        .unwrap();
    assert_eq!(text(&offset_page[0], "study_id").as_deref(), Some("s3"));
    assert_eq!(service.count_associated(&principal(), &studies, None).unwrap(), 3);

    let hidden = EntityService::new(
        &registry,
        SqliteRecordRepository::new(&conn),
        Collaborators::new(&checker, &limits).with_authorizer(&HiddenProtocols),
    );
    let protocol = AssociationScope::new("study", "protocol", "s1");
    match hidden
        .count_associated(&principal(), &protocol, None)
        .unwrap_err()
    {
        EngineError::Unauthorized { entity, action } => {
            assert_eq!(entity, "protocol");
            assert_eq!(action, "read");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
