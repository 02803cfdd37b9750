//! Search expression model and storage predicate translation.
//!
//! # See also
//! - `service::pagination` for how predicates drive bounded scans.

pub mod predicate;
