//! Encoding boundaries between records and their external/stored forms.
//!
//! # Responsibility
//! - Cursor tokens (`cursor`), array columns (`fk_array`), typed column values
//!   (`sql_value`).
//!
//! # Invariants
//! - Business logic never parses JSON column text or cursor tokens directly.

pub mod cursor;
pub mod fk_array;
pub mod sql_value;
