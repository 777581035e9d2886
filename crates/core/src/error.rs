//! Domain error model.

use thiserror::Error;

/// Domain-level error.
///
/// Keep this focused on deterministic failures (malformed identifiers,
/// unknown entities, non-object payloads). Storage and transport concerns live in the
/// engine crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (empty, wrong JSON type, parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The entity name does not map to a known table/resource.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// A record payload was expected to be a JSON object.
    #[error("record must be a JSON object")]
    NotAnObject,
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn unknown_entity(name: impl Into<String>) -> Self {
        Self::UnknownEntity(name.into())
    }
}
