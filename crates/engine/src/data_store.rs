//! Offline-first read/write facade.
//!
//! Reads are served from the local store first. Writes always land locally
//! before any remote attempt; the backend is updated opportunistically and
//! anything it did not confirm goes to the sync queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use tokosync_core::record::{self, SyncStatus};
use tokosync_core::{DomainError, Entity, LocalRecord, QueueItemId, RecordId};

use crate::api::{ApiClient, ApiError};
use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::metadata::SyncMetadataStore;
use crate::queue::{Operation, QueueError, SyncQueue};
use crate::replay::{self, SyncReport};
use crate::store::{LocalStore, StoreError};

pub type RemoteFuture = Pin<Box<dyn Future<Output = Result<Value, ApiError>> + Send + 'static>>;

/// A deferred remote call supplied by the caller (fetch, create, update or
/// delete against the backend).
pub type RemoteCall = Box<dyn FnOnce() -> RemoteFuture + Send + 'static>;

/// Box an async closure as a [`RemoteCall`].
pub fn remote<F, Fut>(f: F) -> RemoteCall
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

#[derive(Debug, thiserror::Error)]
pub enum DataStoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("remote request failed: {0}")]
    Remote(#[from] ApiError),
    /// The write is stored locally and queued; the backend has not confirmed it.
    #[error("{entity}/{id} saved locally but not synced (queue item {queue_id}): {source}")]
    NotSynced {
        entity: Entity,
        id: RecordId,
        queue_id: QueueItemId,
        source: ApiError,
    },
}

impl DataStoreError {
    /// True when the write itself is safe locally and only remote delivery failed.
    pub fn is_persisted_locally(&self) -> bool {
        matches!(self, DataStoreError::NotSynced { .. })
    }
}

/// Offline-first data access.
///
/// Cheap to clone; clones share the store, queue and HTTP client.
#[derive(Debug, Clone)]
pub struct DataStore {
    store: LocalStore,
    queue: SyncQueue,
    metadata: SyncMetadataStore,
    api: ApiClient,
}

impl DataStore {
    /// Build a facade over `api`, sharing its queue and local store.
    pub fn new(api: ApiClient) -> Self {
        let queue = api.queue().clone();
        let store = queue.store().clone();
        Self {
            metadata: SyncMetadataStore::new(store.clone()),
            store,
            queue,
            api,
        }
    }

    pub fn from_config(config: &SyncConfig, connectivity: Arc<dyn Connectivity>) -> Self {
        let store = LocalStore::new(config.database.clone());
        let queue = SyncQueue::new(store);
        Self::new(ApiClient::from_config(config, connectivity, queue))
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn metadata(&self) -> &SyncMetadataStore {
        &self.metadata
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn is_online(&self) -> bool {
        self.api.is_online()
    }

    /// Local read only.
    pub async fn get(&self, entity: Entity, key: &RecordId) -> Result<Option<Value>, DataStoreError> {
        Ok(self.store.get(entity, key).await?)
    }

    /// Stale-while-revalidate read.
    ///
    /// A cached record is returned immediately; while online, `fetch` then runs
    /// in the background and overwrites it with the backend's copy. On a miss
    /// `fetch` is awaited (online only) and its result stored as `synced`.
    pub async fn get_or_fetch(
        &self,
        entity: Entity,
        key: &RecordId,
        fetch: RemoteCall,
    ) -> Result<Option<Value>, DataStoreError> {
        if let Some(cached) = self.store.get(entity, key).await? {
            if self.is_online() {
                self.spawn_refresh(entity, key.clone(), fetch);
            }
            return Ok(Some(cached));
        }

        if !self.is_online() {
            return Ok(None);
        }

        match fetch().await {
            Ok(value) => Ok(Some(store_fetched(&self.store, entity, key, &value).await?)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(ApiError::Offline) => Ok(None),
            Err(err) => Err(DataStoreError::Remote(err)),
        }
    }

    /// [`get_or_fetch`](Self::get_or_fetch) against `GET /api/<entity>/<key>`.
    pub async fn get_remote(&self, entity: Entity, key: &RecordId) -> Result<Option<Value>, DataStoreError> {
        let call = self.fetch_call(entity, key);
        self.get_or_fetch(entity, key, call).await
    }

    /// Everything cached locally for `entity`; no network.
    pub async fn get_all(&self, entity: Entity) -> Result<Vec<Value>, DataStoreError> {
        Ok(self.store.get_all(entity).await?)
    }

    pub async fn get_record<E: DeserializeOwned>(
        &self,
        entity: Entity,
        key: &RecordId,
    ) -> Result<Option<LocalRecord<E>>, DataStoreError> {
        Ok(self.store.get_as(entity, key).await?)
    }

    pub async fn get_all_records<E: DeserializeOwned>(
        &self,
        entity: Entity,
    ) -> Result<Vec<LocalRecord<E>>, DataStoreError> {
        self.store
            .get_all(entity)
            .await?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(|e| DataStoreError::Store(StoreError::from(e))))
            .collect()
    }

    /// Write `data` locally, then try `sync` (when online); queued as `update`.
    ///
    /// `Err(NotSynced)` means the record is stored and queued, not lost.
    pub async fn save(
        &self,
        entity: Entity,
        data: Value,
        sync: Option<RemoteCall>,
    ) -> Result<Value, DataStoreError> {
        self.write(Operation::Update, entity, data, sync).await
    }

    /// As [`save`](Self::save), queued as `create`. A missing `id` is filled
    /// with a temporary one until the backend assigns its own.
    pub async fn create(
        &self,
        entity: Entity,
        data: Value,
        create: Option<RemoteCall>,
    ) -> Result<Value, DataStoreError> {
        self.write(Operation::Create, entity, data, create).await
    }

    /// [`save`](Self::save) with `PUT /api/<entity>/<id>` as the remote call.
    pub async fn save_remote(&self, entity: Entity, data: Value) -> Result<Value, DataStoreError> {
        let key = RecordId::of_record(&data)?;
        let body = record::strip_bookkeeping(&data);
        let call = self.api_call(Method::PUT, entity.item_path(&key), Some(body));
        self.save(entity, data, Some(call)).await
    }

    /// [`create`](Self::create) with `POST /api/<entity>` as the remote call.
    pub async fn create_remote(&self, entity: Entity, data: Value) -> Result<Value, DataStoreError> {
        let data = with_id(data)?;
        let body = record::strip_bookkeeping(&data);
        let call = self.api_call(Method::POST, entity.collection_path(), Some(body));
        self.create(entity, data, Some(call)).await
    }

    /// Hard-delete locally, then try `remote` (when online); queued as `delete`.
    pub async fn delete(
        &self,
        entity: Entity,
        key: &RecordId,
        remote: Option<RemoteCall>,
    ) -> Result<(), DataStoreError> {
        self.store.delete(entity, key).await?;
        let data = json!({ "id": key });

        if let Some(call) = self.direct_call(entity, key, remote).await? {
            return match call().await {
                Ok(_) => Ok(()),
                Err(source) => {
                    let queue_id = self.queue.enqueue(Operation::Delete, entity, key, &data).await?;
                    tracing::warn!(%entity, id = %key, error = %source, "remote delete failed; queued");
                    Err(DataStoreError::NotSynced {
                        entity,
                        id: key.clone(),
                        queue_id,
                        source,
                    })
                }
            };
        }

        self.queue.enqueue(Operation::Delete, entity, key, &data).await?;
        Ok(())
    }

    /// [`delete`](Self::delete) with `DELETE /api/<entity>/<key>` as the remote call.
    pub async fn delete_remote(&self, entity: Entity, key: &RecordId) -> Result<(), DataStoreError> {
        let call = self.api_call(Method::DELETE, entity.item_path(key), None);
        self.delete(entity, key, Some(call)).await
    }

    /// Drain the sync queue. Does nothing while offline.
    pub async fn sync_pending(&self) -> Result<SyncReport, DataStoreError> {
        if !self.is_online() {
            tracing::debug!("offline; not draining sync queue");
            return Ok(SyncReport::skipped());
        }

        let report = replay::drain(&self.api, &self.queue, Some(&self.store)).await?;
        if report.is_clean() {
            self.metadata.record_successful_sync().await?;
        }
        Ok(report)
    }

    async fn write(
        &self,
        operation: Operation,
        entity: Entity,
        data: Value,
        remote: Option<RemoteCall>,
    ) -> Result<Value, DataStoreError> {
        let fields = record::strip_bookkeeping(&data);
        let fields = match operation {
            Operation::Create => with_id(fields)?,
            Operation::Update | Operation::Delete => fields,
        };
        let key = RecordId::of_record(&fields)?;

        let local = record::stamp(&fields, SyncStatus::Pending, None)?;
        self.store.put(entity, &local).await?;

        if let Some(call) = self.direct_call(entity, &key, remote).await? {
            return match call().await {
                Ok(response) => Ok(replay::apply_server_copy(&self.store, entity, &key, &local, &response).await?),
                Err(source) => {
                    let queue_id = self.queue.enqueue(operation, entity, &key, &fields).await?;
                    tracing::warn!(%entity, id = %key, error = %source, "remote write failed; queued");
                    Err(DataStoreError::NotSynced {
                        entity,
                        id: key,
                        queue_id,
                        source,
                    })
                }
            };
        }

        self.queue.enqueue(operation, entity, &key, &fields).await?;
        Ok(local)
    }

    /// The remote call to make now, if any. Offline, or with older mutations
    /// of the record still queued, the write goes through the queue instead so
    /// the backend sees mutations in the order they were made.
    async fn direct_call(
        &self,
        entity: Entity,
        key: &RecordId,
        remote: Option<RemoteCall>,
    ) -> Result<Option<RemoteCall>, DataStoreError> {
        let Some(call) = remote.filter(|_| self.is_online()) else {
            return Ok(None);
        };
        if self.queue.has_unsynced_for(entity, key).await? {
            tracing::debug!(%entity, id = %key, "older mutations queued; queueing behind them");
            return Ok(None);
        }
        Ok(Some(call))
    }

    /// Stale-while-revalidate refresh; runs detached, errors are only logged.
    fn spawn_refresh(&self, entity: Entity, key: RecordId, fetch: RemoteCall) {
        let store = self.store.clone();
        let queue = self.queue.clone();

        tokio::spawn(async move {
            let value = match fetch().await {
                Ok(value) => value,
                Err(err) => {
                    tracing::debug!(%entity, id = %key, error = %err, "background refresh failed");
                    return;
                }
            };

            // Unconfirmed local edits win over the backend copy.
            match queue.has_unsynced_for(entity, &key).await {
                Ok(false) => {}
                Ok(true) => {
                    tracing::debug!(%entity, id = %key, "local changes pending; refresh discarded");
                    return;
                }
                Err(err) => {
                    tracing::error!(%entity, id = %key, error = %err, "background refresh failed");
                    return;
                }
            }

            if let Err(err) = store_fetched(&store, entity, &key, &value).await {
                tracing::error!(%entity, id = %key, error = %err, "failed to store refreshed record");
            }
        });
    }

    fn fetch_call(&self, entity: Entity, key: &RecordId) -> RemoteCall {
        self.api_call(Method::GET, entity.item_path(key), None)
    }

    fn api_call(&self, method: Method, endpoint: String, body: Option<Value>) -> RemoteCall {
        let api = self.api.clone();
        remote(move || async move { api.request(method, &endpoint, body.as_ref()).await })
    }
}

/// Persist a fetched record as `synced`, defaulting its id to `key`.
async fn store_fetched(
    store: &LocalStore,
    entity: Entity,
    key: &RecordId,
    value: &Value,
) -> Result<Value, StoreError> {
    let mut obj = value.as_object().ok_or(DomainError::NotAnObject)?.clone();
    obj.entry("id").or_insert_with(|| json!(key));
    let synced = record::stamp(&Value::Object(obj), SyncStatus::Synced, Some(chrono::Utc::now()))?;
    store.put(entity, &synced).await?;
    Ok(synced)
}

/// Give an id-less record a temporary id.
fn with_id(data: Value) -> Result<Value, DomainError> {
    let mut obj = match data {
        Value::Object(obj) => obj,
        _ => return Err(DomainError::NotAnObject),
    };
    obj.entry("id")
        .or_insert_with(|| json!(RecordId::temporary()));
    Ok(Value::Object(obj))
}
