//! Engines and use-case services over the record repository.
//!
//! # Responsibility
//! - Pagination, association synchronization and deletion guarding for any
//!   registered entity.
//! - `EntityService` wires external collaborators around those engines.
//!
//! # Invariants
//! - Services never issue SQL directly; storage goes through
//!   `RecordRepository`.
//! - Engines resolve entities and relations through the injected
//!   `EntityRegistry`, never by name conventions.

pub mod association;
pub mod deletion_guard;
pub mod entity_service;
pub mod error;
pub mod pagination;
