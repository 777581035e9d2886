//! Local record envelope: business fields plus sync bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;

/// Bookkeeping field carrying the last confirmed sync time.
pub const SYNCED_AT_FIELD: &str = "syncedAt";
/// Bookkeeping field carrying the [`SyncStatus`].
pub const SYNC_STATUS_FIELD: &str = "syncStatus";

/// Sync state of a locally persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Written locally, not yet confirmed by the backend.
    Pending,
    /// Matches the backend's authoritative copy as of `syncedAt`.
    Synced,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }
}

/// Typed view of a persisted record.
///
/// On disk the entity fields and the bookkeeping fields share one flat JSON
/// object, e.g. `{"id":"c1","name":"Budi","syncStatus":"pending"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord<E> {
    #[serde(flatten)]
    pub fields: E,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_status: SyncStatus,
}

impl<E> LocalRecord<E> {
    pub fn is_synced(&self) -> bool {
        self.sync_status == SyncStatus::Synced
    }
}

/// Copy `data` and stamp the bookkeeping fields onto it.
///
/// Any bookkeeping already present in `data` is replaced; `synced_at = None`
/// removes `syncedAt`.
pub fn stamp(
    data: &Value,
    status: SyncStatus,
    synced_at: Option<DateTime<Utc>>,
) -> Result<Value, DomainError> {
    let mut obj = data.as_object().ok_or(DomainError::NotAnObject)?.clone();
    obj.insert(
        SYNC_STATUS_FIELD.to_string(),
        Value::String(status.as_str().to_string()),
    );
    match synced_at {
        Some(at) => {
            obj.insert(SYNCED_AT_FIELD.to_string(), Value::String(at.to_rfc3339()));
        }
        None => {
            obj.remove(SYNCED_AT_FIELD);
        }
    }
    Ok(Value::Object(obj))
}

/// The business fields of a record, without bookkeeping.
pub fn strip_bookkeeping(data: &Value) -> Value {
    match data {
        Value::Object(obj) => Value::Object(
            obj.iter()
                .filter(|(k, _)| k.as_str() != SYNCED_AT_FIELD && k.as_str() != SYNC_STATUS_FIELD)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Read the [`SyncStatus`] stamped on a stored record.
pub fn sync_status_of(data: &Value) -> Option<SyncStatus> {
    data.get(SYNC_STATUS_FIELD)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}
