//! Strongly-typed identifiers used across the engine.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DomainError;

/// Primary key of a local record (the entity id as the backend knows it).
///
/// Backends hand out both string and numeric ids; both are normalised to their
/// string form so every table shares a single key type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generate a fresh, time-ordered identifier (UUIDv7).
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Placeholder id for records created offline before the backend assigned one.
    pub fn temporary() -> Self {
        Self(format!("temp-{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with("temp-")
    }

    /// Extract an id from a JSON value (`"c1"` or `42`).
    pub fn from_json(value: &Value) -> Result<Self, DomainError> {
        match value {
            Value::String(s) => s.parse(),
            Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(DomainError::invalid_id(format!(
                "expected string or number, got {other}"
            ))),
        }
    }

    /// Read the `id` field of a record payload.
    pub fn of_record(record: &Value) -> Result<Self, DomainError> {
        let obj = record.as_object().ok_or(DomainError::NotAnObject)?;
        let id = obj
            .get("id")
            .ok_or_else(|| DomainError::invalid_id("record has no `id` field"))?;
        Self::from_json(id)
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_id("RecordId: empty"));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<RecordId> for String {
    fn from(value: RecordId) -> Self {
        value.0
    }
}

/// Auto-increment identifier of a sync queue row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueItemId(i64);

impl QueueItemId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for QueueItemId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}
