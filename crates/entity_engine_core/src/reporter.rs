//! Per-request accumulator of non-fatal errors.
//!
//! # Responsibility
//! - Collect structured entries for failures that must not abort the
//!   surrounding operation (association fan-out, best-effort hooks).
//!
//! # Invariants
//! - Entries are kept in push order.
//! - A reporter is owned by one top-level request and never shared across
//!   requests.

use serde::Serialize;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BenignErrorKind {
    NotFound,
    Storage,
    InvalidData,
    Validation,
}

/// One reported non-fatal failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BenignError {
    pub kind: BenignErrorKind,
    pub message: String,
    pub entity: String,
    pub id: Option<String>,
    pub relation: Option<String>,
}

impl BenignError {
    pub fn new(kind: BenignErrorKind, entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            entity: entity.into(),
            id: None,
            relation: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }
}

impl Display for BenignError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.entity)?;
        if let Some(relation) = &self.relation {
            write!(f, ".{relation}")?;
        }
        if let Some(id) = &self.id {
            write!(f, " [{id}]")?;
        }
        write!(f, ": {}", self.message)
    }
}

#[derive(Debug, Default)]
pub struct BenignErrorReporter {
    errors: Vec<BenignError>,
}

impl BenignErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: BenignError) {
        self.errors.push(error);
    }

    pub fn errors(&self) -> &[BenignError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<BenignError> {
        self.errors
    }
}
