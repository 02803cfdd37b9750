//! Schema model for dynamically described entities.
//!
//! # Responsibility
//! - Define entity/relation descriptors and the record shape they govern.
//! - Provide the registry that engines receive by injection.
//!
//! # Invariants
//! - Schema objects are defined once at startup and never mutated afterwards.
//! - Relation metadata is looked up by name through the registry, never by
//!   ad-hoc string probing of records.

pub mod entity;
pub mod record;
pub mod registry;
