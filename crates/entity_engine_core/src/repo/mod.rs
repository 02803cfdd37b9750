//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the entity-generic record storage contract.
//! - Isolate SQLite query details from engine orchestration.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`, `UnknownAttribute`)
//!   in addition to DB transport errors.

pub mod record_repo;
