#![allow(dead_code)]

use entity_engine_core::codec::fk_array::ids_from_value;
use entity_engine_core::{
    EntityRegistry, Record, RecordRepository, RepoResult, SqliteRecordRepository,
};
use serde_json::Value;

pub const STUDY_SCHEMA: &str = r#"[
  {
    "model": "study",
    "storage_name": "studies",
    "id_attribute": "study_id",
    "attributes": {
      "study_id": "String",
      "title": "String",
      "year": "Int",
      "protocol_id": "String",
      "publication_ids": "[String]"
    },
    "associations": {
      "protocol": {
        "type": "to_one", "target": "protocol", "keys_in": "local",
        "key": "protocol_id", "reverse": "studies"
      },
      "publications": {
        "type": "to_many", "target": "publication", "keys_in": "local",
        "key": "publication_ids", "reverse": "studies"
      },
      "assays": {
        "type": "to_many", "target": "assay", "keys_in": "foreign",
        "key": "study_id", "reverse": "study"
      }
    }
  },
  {
    "model": "protocol",
    "id_attribute": "protocol_id",
    "attributes": { "protocol_id": "String", "name": "String" },
    "associations": {
      "studies": {
        "type": "to_many", "target": "study", "keys_in": "foreign",
        "key": "protocol_id", "reverse": "protocol"
      }
    }
  },
  {
    "model": "publication",
    "id_attribute": "publication_id",
    "attributes": {
      "publication_id": "String",
      "title": "String",
      "study_ids": "[String]"
    },
    "associations": {
      "studies": {
        "type": "to_many", "target": "study", "keys_in": "local",
        "key": "study_ids", "reverse": "publications"
      }
    }
  },
  {
    "model": "assay",
    "id_attribute": "assay_id",
    "attributes": { "assay_id": "Int", "name": "String", "study_id": "String" },
    "associations": {
      "study": {
        "type": "to_one", "target": "study", "keys_in": "local",
        "key": "study_id", "reverse": "assays", "on_delete": "update"
      }
    }
  },
  {
    "model": "dataset",
    "id_attribute": "dataset_id",
    "attributes": {
      "dataset_id": "String",
      "name": "String",
      "datafile_ids": "[String]"
    },
    "associations": {
      "datafiles": {
        "type": "to_many", "target": "datafile", "keys_in": "local",
        "key": "datafile_ids", "reverse": "dataset", "on_delete": "update"
      }
    }
  },
  {
    "model": "datafile",
    "id_attribute": "datafile_id",
    "attributes": {
      "datafile_id": "String",
      "name": "String",
      "dataset_id": "String"
    },
    "associations": {
      "dataset": {
        "type": "to_one", "target": "dataset", "keys_in": "local",
        "key": "dataset_id", "reverse": "datafiles"
      }
    }
  }
]"#;

pub fn registry() -> EntityRegistry {
    EntityRegistry::from_json(STUDY_SCHEMA).unwrap()
}

pub fn insert(
    repo: &SqliteRecordRepository<'_>,
    registry: &EntityRegistry,
    entity: &str,
    record: Record,
) -> RepoResult<String> {
    repo.insert_record(registry.entity(entity).unwrap(), &record)
}

pub fn load(
    repo: &SqliteRecordRepository<'_>,
    registry: &EntityRegistry,
    entity: &str,
    id: &str,
) -> Record {
    repo.get_record(registry.entity(entity).unwrap(), id)
        .unwrap()
        .unwrap()
}

/// Ids held by an array attribute, in stored order. Null reads as empty.
pub fn ids(record: &Record, attribute: &str) -> Vec<String> {
    ids_from_value(record.get(attribute))
}

pub fn text(record: &Record, attribute: &str) -> Option<String> {
    record.get(attribute).and_then(Value::as_str).map(str::to_string)
}

pub fn owned(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}
