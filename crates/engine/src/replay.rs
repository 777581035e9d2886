//! Queue replay: pushes queued mutations to the backend in insertion order.
//!
//! A drain:
//! - claims each pending item before dispatching it (at most one claim wins)
//! - maps create/update/delete to POST/PUT/DELETE on `/api/<entity>[/<id>]`
//! - deletes the item on success and writes the server's copy back locally
//! - records failures against the item's retry budget
//! - stops early, without spending retries, when the client goes offline

use chrono::Utc;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tokosync_core::record::{self, SyncStatus};
use tokosync_core::{DomainError, Entity, RecordId};

use crate::api::{ApiClient, ApiError};
use crate::queue::{Operation, QueueError, QueueItem, QueueStatus, SyncQueue};
use crate::store::{LocalStore, StoreError};

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Items dispatched to the backend.
    pub attempted: usize,
    pub completed: usize,
    /// Failed, but still within the retry budget.
    pub retrying: usize,
    /// Failed for the last time; now `failed`.
    pub exhausted: usize,
    /// Left pending because the client went offline mid-drain.
    pub deferred: usize,
    /// Another drain was already running; nothing was done.
    pub skipped: bool,
}

impl SyncReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Ran to the end and every dispatched item succeeded.
    pub fn is_clean(&self) -> bool {
        !self.skipped && self.retrying == 0 && self.exhausted == 0 && self.deferred == 0
    }
}

/// Replay every pending item through `api`.
///
/// With a `store`, successful creates and updates are written back as
/// `synced`. Returns immediately with a skipped report while another drain
/// over the same queue is running.
pub async fn drain(
    api: &ApiClient,
    queue: &SyncQueue,
    store: Option<&LocalStore>,
) -> Result<SyncReport, QueueError> {
    let Some(_guard) = queue.begin_drain() else {
        tracing::debug!("drain already in progress; skipping");
        return Ok(SyncReport::skipped());
    };

    let pending = queue.list_pending().await?;
    let mut report = SyncReport::default();
    if pending.is_empty() {
        return Ok(report);
    }

    tracing::info!(count = pending.len(), "replaying queued mutations");

    let total = pending.len();
    for (idx, listed) in pending.into_iter().enumerate() {
        match queue.mark_processing(listed.id).await {
            Ok(true) => {}
            Ok(false) | Err(QueueError::Exhausted { .. }) => {
                tracing::debug!(id = %listed.id, "queue item no longer pending; skipping");
                continue;
            }
            Err(err) => return Err(err),
        }

        // An earlier create in this drain may have re-keyed the item.
        let item = match queue.get(listed.id).await {
            Ok(Some(item)) => item,
            Ok(None) => continue,
            Err(err) => {
                tracing::error!(id = %listed.id, error = %err, "failed to reload claimed queue item");
                release(queue, &listed).await;
                continue;
            }
        };

        match dispatch(api, &item).await {
            Ok(response) => {
                report.attempted += 1;
                if let Err(err) = queue.mark_completed(item.id).await {
                    tracing::error!(id = %item.id, error = %err, "delivered, but failed to complete queue item");
                    release(queue, &item).await;
                    report.retrying += 1;
                    continue;
                }
                report.completed += 1;
                tracing::debug!(id = %item.id, entity = %item.entity, entity_id = %item.entity_id, "queue item synced");

                if let Some(store) = store {
                    if let Err(err) = write_back(store, queue, &item, &response).await {
                        tracing::warn!(id = %item.id, error = %err, "synced, but failed to update local record");
                    }
                }
            }
            Err(ApiError::Offline) => {
                release(queue, &item).await;
                report.deferred = total - idx;
                tracing::info!(remaining = report.deferred, "went offline during drain; stopping");
                break;
            }
            Err(err) => {
                report.attempted += 1;
                match queue.mark_failed(item.id, &err.to_string()).await {
                    Ok(Some(updated)) if updated.status == QueueStatus::Failed => {
                        report.exhausted += 1;
                        if let Some(store) = store {
                            park_record(store, &item).await;
                        }
                    }
                    Ok(_) => report.retrying += 1,
                    Err(qerr) => {
                        tracing::error!(id = %item.id, error = %qerr, "failed to record dispatch failure");
                        release(queue, &item).await;
                        report.retrying += 1;
                    }
                }
            }
        }
    }

    tracing::info!(
        attempted = report.attempted,
        completed = report.completed,
        retrying = report.retrying,
        exhausted = report.exhausted,
        deferred = report.deferred,
        "drain finished"
    );

    Ok(report)
}

async fn release(queue: &SyncQueue, item: &QueueItem) {
    if let Err(err) = queue.release(item.id).await {
        tracing::error!(id = %item.id, error = %err, "failed to release queue item");
    }
}

/// Mark the local copy of an exhausted item's record as `error`.
async fn park_record(store: &LocalStore, item: &QueueItem) {
    if item.operation == Operation::Delete {
        return;
    }
    if let Err(err) = store
        .set_sync_status(item.entity, &item.entity_id, SyncStatus::Error)
        .await
    {
        tracing::warn!(id = %item.id, error = %err, "failed to mark local record as error");
    }
}

async fn dispatch(api: &ApiClient, item: &QueueItem) -> Result<Value, ApiError> {
    match item.operation {
        Operation::Create => {
            api.request(Method::POST, &item.entity.collection_path(), Some(&item.data))
                .await
        }
        Operation::Update => {
            api.request(
                Method::PUT,
                &item.entity.item_path(&item.entity_id),
                Some(&item.data),
            )
            .await
        }
        Operation::Delete => {
            api.request(Method::DELETE, &item.entity.item_path(&item.entity_id), None)
                .await
        }
    }
}

/// Mark the local copy of a replayed record as `synced`.
///
/// A create answered with a new id first moves the local record and every
/// unconfirmed follow-up mutation to that id. The server copy is then stored
/// unless the record is gone locally or still has unconfirmed mutations.
async fn write_back(
    store: &LocalStore,
    queue: &SyncQueue,
    item: &QueueItem,
    response: &Value,
) -> Result<(), QueueError> {
    if item.operation == Operation::Delete {
        return Ok(());
    }

    let mut key = item.entity_id.clone();
    if item.operation == Operation::Create {
        if let Some(server_id) = assigned_id(response).filter(|id| *id != item.entity_id) {
            queue.rekey(item.entity, &item.entity_id, &server_id).await?;
            if let Some(local) = store.get(item.entity, &item.entity_id).await? {
                let moved = with_record_id(&local, &server_id).map_err(StoreError::from)?;
                store.replace_key(item.entity, &item.entity_id, &moved).await?;
                tracing::debug!(entity = %item.entity, from = %item.entity_id, to = %server_id, "re-keyed local record");
            }
            key = server_id;
        }
    }

    let Some(local) = store.get(item.entity, &key).await? else {
        return Ok(());
    };

    if queue.has_unsynced_for(item.entity, &key).await? {
        tracing::debug!(entity = %item.entity, entity_id = %key, "newer mutation queued; keeping local record");
        return Ok(());
    }

    apply_server_copy(store, item.entity, &key, &local, response).await?;
    Ok(())
}

/// The id carried by an object response, if any.
fn assigned_id(response: &Value) -> Option<RecordId> {
    response
        .is_object()
        .then(|| RecordId::of_record(response).ok())
        .flatten()
}

fn with_record_id(local: &Value, id: &RecordId) -> Result<Value, DomainError> {
    let mut obj = local.as_object().ok_or(DomainError::NotAnObject)?.clone();
    obj.insert("id".to_string(), Value::from(id.as_str()));
    Ok(Value::Object(obj))
}

/// Store the backend's answer for `key` as the `synced` local record.
///
/// An object response carrying an `id` replaces the record (re-keyed if the
/// backend assigned a different id). Anything else re-stamps `local`.
pub(crate) async fn apply_server_copy(
    store: &LocalStore,
    entity: Entity,
    key: &RecordId,
    local: &Value,
    response: &Value,
) -> Result<Value, StoreError> {
    let now = Utc::now();
    match assigned_id(response) {
        Some(server_id) => {
            let synced = record::stamp(response, SyncStatus::Synced, Some(now))?;
            if &server_id == key {
                store.put(entity, &synced).await?;
            } else {
                store.replace_key(entity, key, &synced).await?;
                tracing::debug!(%entity, from = %key, to = %server_id, "re-keyed local record");
            }
            Ok(synced)
        }
        None => {
            let synced = record::stamp(local, SyncStatus::Synced, Some(now))?;
            store.put(entity, &synced).await?;
            Ok(synced)
        }
    }
}
