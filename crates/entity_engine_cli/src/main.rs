//! CLI smoke entry point.
//!
//! # Responsibility
//! - Load a JSON schema, open (or create) a database and apply the schema.
//! - Print deterministic entity/relation/record counts for sanity checks.

use clap::Parser;
use entity_engine_core::search::predicate::StoragePredicate;
use entity_engine_core::{
    core_version, init_logging_from_config, open_db, open_db_in_memory, EngineConfig,
    EntityRegistry, RecordRepository, SqliteRecordRepository,
};
use log::info;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "entity-engine", version, about = "Schema bootstrap smoke check")]
struct Args {
    /// JSON array of model definitions.
    schema: PathBuf,

    /// SQLite database file; in-memory when omitted.
    #[arg(long, env = "ENTITY_ENGINE_DB")]
    db: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("entity-engine: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let config = EngineConfig::from_env()?;
    init_logging_from_config(&config)?;

    let document = std::fs::read_to_string(&args.schema)?;
    let registry = EntityRegistry::from_json(&document)?;
    let conn = match &args.db {
        Some(path) => open_db(path, &registry)?,
        None => open_db_in_memory(&registry)?,
    };
    info!(
        "event=cli_bootstrap module=cli status=ok entities={} relations={}",
        registry.len(),
        registry.relation_count()
    );

    println!("entity_engine version={}", core_version());
    println!(
        "entities={} relations={}",
        registry.len(),
        registry.relation_count()
    );

    let repo = SqliteRecordRepository::new(&conn);
    let everything = StoragePredicate::always();
    for entity in registry.entities() {
        let records = repo.count(entity, &everything)?;
        println!(
            "entity={} table={} records={}",
            entity.name, entity.storage_name, records
        );
    }
    Ok(())
}
