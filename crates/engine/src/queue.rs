//! Durable sync queue persisted in SQLite.
//!
//! Every local mutation that has not been confirmed by the backend is recorded
//! here as a [`QueueItem`] and replayed later by [`crate::replay::drain`].
//! Items move `pending -> processing -> {deleted | pending | failed}`; `failed`
//! is terminal until a manual retry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;

use tokosync_core::record::{self, SyncStatus};
use tokosync_core::{Entity, QueueItemId, RecordId};

use crate::store::{LocalStore, StoreError};

/// Dispatch attempts before an item is parked as `failed`.
pub const MAX_RETRIES: u32 = 3;

/// Kind of mutation carried by a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Operation::Create),
            "update" => Some(Operation::Update),
            "delete" => Some(Operation::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    /// Never persisted in practice: completion deletes the row.
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "processing" => Some(QueueStatus::Processing),
            "completed" => Some(QueueStatus::Completed),
            "failed" => Some(QueueStatus::Failed),
            _ => None,
        }
    }
}

/// A queued mutation awaiting remote confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: QueueItemId,
    pub operation: Operation,
    pub entity: Entity,
    pub entity_id: RecordId,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub retries: u32,
    pub status: QueueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Item counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to (de)serialize queue payload: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt queue row {id}: {reason}")]
    Corrupt { id: i64, reason: String },
    #[error("queue item {id} exhausted after {retries} attempts")]
    Exhausted { id: QueueItemId, retries: u32 },
    #[error("queue item {0} not found")]
    NotFound(QueueItemId),
}

/// SQLite-backed sync queue.
///
/// Cheap to clone; clones share the local store and the drain guard.
#[derive(Debug, Clone)]
pub struct SyncQueue {
    store: LocalStore,
    draining: Arc<AtomicBool>,
}

/// Held for the duration of a drain; releases the guard on drop.
#[derive(Debug)]
pub struct DrainGuard {
    draining: Arc<AtomicBool>,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        self.draining.store(false, Ordering::SeqCst);
    }
}

const COLUMNS: &str = "id, operation, entity, entity_id, data, timestamp, retries, status, error";

impl SyncQueue {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Append a pending mutation and return its id.
    pub async fn enqueue(
        &self,
        operation: Operation,
        entity: Entity,
        entity_id: &RecordId,
        data: &Value,
    ) -> Result<QueueItemId, QueueError> {
        let pool = self.store.open().await?;
        let payload = serde_json::to_string(data)?;

        let result = sqlx::query(
            r#"
            INSERT INTO sync_queue (
                operation,
                entity,
                entity_id,
                data,
                timestamp,
                retries,
                status,
                error
            )
            VALUES (?1, ?2, ?3, ?4, ?5, 0, 'pending', NULL)
            "#,
        )
        .bind(operation.as_str())
        .bind(entity.as_str())
        .bind(entity_id.as_str())
        .bind(&payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await?;

        let id = QueueItemId::from(result.last_insert_rowid());
        tracing::debug!(%id, operation = operation.as_str(), %entity, %entity_id, "enqueued mutation");
        Ok(id)
    }

    /// All `pending` items in insertion order.
    pub async fn list_pending(&self) -> Result<Vec<QueueItem>, QueueError> {
        self.list_where(Some(QueueStatus::Pending)).await
    }

    pub async fn list_failed(&self) -> Result<Vec<QueueItem>, QueueError> {
        self.list_where(Some(QueueStatus::Failed)).await
    }

    pub async fn list_all(&self) -> Result<Vec<QueueItem>, QueueError> {
        self.list_where(None).await
    }

    pub async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, QueueError> {
        let pool = self.store.open().await?;
        let sql = format!("SELECT {COLUMNS} FROM sync_queue WHERE id = ?1");

        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&pool)
            .await?;
        row.map(row_to_item).transpose()
    }

    /// Claim a pending item for dispatch.
    ///
    /// Returns `false` when the item is missing or already claimed; claiming
    /// a `failed` item is an [`QueueError::Exhausted`] error.
    pub async fn mark_processing(&self, id: QueueItemId) -> Result<bool, QueueError> {
        let pool = self.store.open().await?;

        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'processing'
            WHERE id = ?1
              AND status = 'pending'
            "#,
        )
        .bind(id.get())
        .execute(&pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        match self.get(id).await? {
            Some(item) if item.status == QueueStatus::Failed => Err(QueueError::Exhausted {
                id,
                retries: item.retries,
            }),
            _ => Ok(false),
        }
    }

    /// Delete a successfully dispatched item. Unknown ids are ignored.
    pub async fn mark_completed(&self, id: QueueItemId) -> Result<(), QueueError> {
        let pool = self.store.open().await?;
        sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
            .bind(id.get())
            .execute(&pool)
            .await?;
        Ok(())
    }

    /// Record a failed dispatch attempt.
    ///
    /// Increments `retries`; the item goes back to `pending` or, once it has
    /// used up [`MAX_RETRIES`], to `failed`. Returns the updated item, or
    /// `None` if it no longer exists or is already `failed`.
    pub async fn mark_failed(
        &self,
        id: QueueItemId,
        error: &str,
    ) -> Result<Option<QueueItem>, QueueError> {
        let pool = self.store.open().await?;
        let sql = format!(
            r#"
            UPDATE sync_queue
            SET retries = retries + 1,
                status = CASE WHEN retries + 1 >= ?3 THEN 'failed' ELSE 'pending' END,
                error = ?2
            WHERE id = ?1
              AND status IN ('pending', 'processing')
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(id.get())
            .bind(error)
            .bind(i64::from(MAX_RETRIES))
            .fetch_optional(&pool)
            .await?;

        let item = row.map(row_to_item).transpose()?;
        if let Some(item) = &item {
            if item.status == QueueStatus::Failed {
                tracing::warn!(%id, retries = item.retries, error, "queue item exhausted");
            } else {
                tracing::warn!(%id, retries = item.retries, error, "queue item will be retried");
            }
        }
        Ok(item)
    }

    /// Put a claimed item back without counting an attempt.
    pub async fn release(&self, id: QueueItemId) -> Result<(), QueueError> {
        let pool = self.store.open().await?;
        sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'pending'
            WHERE id = ?1
              AND status = 'processing'
            "#,
        )
        .bind(id.get())
        .execute(&pool)
        .await?;
        Ok(())
    }

    /// Return items left `processing` by an interrupted drain to `pending`.
    pub async fn requeue_processing(&self) -> Result<u64, QueueError> {
        let pool = self.store.open().await?;
        let result =
            sqlx::query("UPDATE sync_queue SET status = 'pending' WHERE status = 'processing'")
                .execute(&pool)
                .await?;

        let n = result.rows_affected();
        if n > 0 {
            tracing::info!(count = n, "requeued interrupted queue items");
        }
        Ok(n)
    }

    /// Move every `failed` item back to `pending` with a fresh retry budget.
    ///
    /// Local records marked `error` by those items go back to `pending`.
    pub async fn retry_failed(&self) -> Result<u64, QueueError> {
        let failed = self.list_failed().await?;
        let pool = self.store.open().await?;
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'pending',
                retries = 0,
                error = NULL
            WHERE status = 'failed'
            "#,
        )
        .execute(&pool)
        .await?;

        self.reopen_records(&failed).await?;

        let n = result.rows_affected();
        tracing::info!(count = n, "failed queue items moved back to pending");
        Ok(n)
    }

    /// Manually retry a single `failed` item.
    pub async fn retry(&self, id: QueueItemId) -> Result<QueueItem, QueueError> {
        let before = self.get(id).await?.ok_or(QueueError::NotFound(id))?;
        let pool = self.store.open().await?;
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'pending',
                retries = 0,
                error = NULL
            WHERE id = ?1
              AND status = 'failed'
            "#,
        )
        .bind(id.get())
        .execute(&pool)
        .await?;

        if result.rows_affected() == 1 {
            self.reopen_records(std::slice::from_ref(&before)).await?;
        }

        self.get(id).await?.ok_or(QueueError::NotFound(id))
    }

    /// Purge leftover `completed` rows.
    pub async fn clear_completed(&self) -> Result<u64, QueueError> {
        let pool = self.store.open().await?;
        let result = sqlx::query("DELETE FROM sync_queue WHERE status = 'completed'")
            .execute(&pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Drop an item regardless of status. Returns whether it existed.
    pub async fn remove(&self, id: QueueItemId) -> Result<bool, QueueError> {
        let pool = self.store.open().await?;
        let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
            .bind(id.get())
            .execute(&pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether any mutation of this record is still unconfirmed
    /// (`pending`, `processing` or `failed`).
    pub async fn has_unsynced_for(
        &self,
        entity: Entity,
        entity_id: &RecordId,
    ) -> Result<bool, QueueError> {
        let pool = self.store.open().await?;
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM sync_queue
            WHERE entity = ?1
              AND entity_id = ?2
              AND status IN ('pending', 'processing', 'failed')
            "#,
        )
        .bind(entity.as_str())
        .bind(entity_id.as_str())
        .fetch_one(&pool)
        .await?;
        Ok(count > 0)
    }

    /// Point unconfirmed mutations of `old` at `new` (both `entityId` and the
    /// payload's `id`). Used when the backend assigns its own id on create.
    pub async fn rekey(
        &self,
        entity: Entity,
        old: &RecordId,
        new: &RecordId,
    ) -> Result<u64, QueueError> {
        let pool = self.store.open().await?;
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET entity_id = ?3,
                data = CASE
                    WHEN json_type(data) = 'object' THEN json_set(data, '$.id', ?3)
                    ELSE data
                END
            WHERE entity = ?1
              AND entity_id = ?2
              AND status IN ('pending', 'processing', 'failed')
            "#,
        )
        .bind(entity.as_str())
        .bind(old.as_str())
        .bind(new.as_str())
        .execute(&pool)
        .await?;

        let n = result.rows_affected();
        if n > 0 {
            tracing::debug!(%entity, from = %old, to = %new, count = n, "re-keyed queued mutations");
        }
        Ok(n)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let pool = self.store.open().await?;
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM sync_queue GROUP BY status")
            .fetch_all(&pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            let n = n as u64;
            match QueueStatus::parse(&status) {
                Some(QueueStatus::Pending) => stats.pending += n,
                Some(QueueStatus::Processing) => stats.processing += n,
                Some(QueueStatus::Completed) => stats.completed += n,
                Some(QueueStatus::Failed) => stats.failed += n,
                None => tracing::warn!(status = %status, "unknown status in sync_queue"),
            }
            stats.total += n;
        }
        Ok(stats)
    }

    /// Try to become the only running drain.
    ///
    /// Returns `None` while another drain on any clone of this queue holds the
    /// guard.
    pub fn begin_drain(&self) -> Option<DrainGuard> {
        self.draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| DrainGuard {
                draining: self.draining.clone(),
            })
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    async fn reopen_records(&self, items: &[QueueItem]) -> Result<(), QueueError> {
        for item in items {
            let Some(local) = self.store.get(item.entity, &item.entity_id).await? else {
                continue;
            };
            if record::sync_status_of(&local) == Some(SyncStatus::Error) {
                self.store
                    .set_sync_status(item.entity, &item.entity_id, SyncStatus::Pending)
                    .await?;
            }
        }
        Ok(())
    }

    async fn list_where(&self, status: Option<QueueStatus>) -> Result<Vec<QueueItem>, QueueError> {
        let pool = self.store.open().await?;

        let rows = match status {
            Some(status) => {
                let sql = format!("SELECT {COLUMNS} FROM sync_queue WHERE status = ?1 ORDER BY id ASC");
                sqlx::query(&sql)
                    .bind(status.as_str())
                    .fetch_all(&pool)
                    .await?
            }
            None => {
                let sql = format!("SELECT {COLUMNS} FROM sync_queue ORDER BY id ASC");
                sqlx::query(&sql).fetch_all(&pool).await?
            }
        };

        rows.into_iter().map(row_to_item).collect()
    }
}

/// Map a database row into a `QueueItem`.
fn row_to_item(row: sqlx::sqlite::SqliteRow) -> Result<QueueItem, QueueError> {
    let raw_id: i64 = row.try_get("id")?;
    let corrupt = |reason: String| QueueError::Corrupt { id: raw_id, reason };

    let operation_str: String = row.try_get("operation")?;
    let operation = Operation::parse(&operation_str)
        .ok_or_else(|| corrupt(format!("unknown operation '{operation_str}'")))?;

    let entity_str: String = row.try_get("entity")?;
    let entity = entity_str
        .parse::<Entity>()
        .map_err(|e| corrupt(e.to_string()))?;

    let entity_id_str: String = row.try_get("entity_id")?;
    let entity_id = entity_id_str
        .parse::<RecordId>()
        .map_err(|e| corrupt(e.to_string()))?;

    let data_str: String = row.try_get("data")?;
    let data: Value = serde_json::from_str(&data_str)?;

    let timestamp_str: String = row.try_get("timestamp")?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupt(format!("invalid timestamp: {e}")))?;

    let retries: i64 = row.try_get("retries")?;
    let retries = u32::try_from(retries).map_err(|_| corrupt(format!("invalid retries {retries}")))?;

    let status_str: String = row.try_get("status")?;
    let status = QueueStatus::parse(&status_str)
        .ok_or_else(|| corrupt(format!("unknown status '{status_str}'")))?;

    let error: Option<String> = row.try_get("error")?;

    Ok(QueueItem {
        id: QueueItemId::from(raw_id),
        operation,
        entity,
        entity_id,
        data,
        timestamp,
        retries,
        status,
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue() -> SyncQueue {
        SyncQueue::new(LocalStore::in_memory())
    }

    fn rid(s: &str) -> RecordId {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn enqueue_and_list_in_insertion_order() {
        let q = queue();
        let a = q
            .enqueue(Operation::Create, Entity::Customers, &rid("c1"), &json!({"id": "c1"}))
            .await
            .unwrap();
        let b = q
            .enqueue(Operation::Update, Entity::Products, &rid("p1"), &json!({"id": "p1"}))
            .await
            .unwrap();
        assert!(a < b);

        let pending = q.list_pending().await.unwrap();
        assert_eq!(pending.iter().map(|i| i.id).collect::<Vec<_>>(), [a, b]);
        assert_eq!(pending[0].status, QueueStatus::Pending);
        assert_eq!(pending[0].retries, 0);
        assert!(pending[0].error.is_none());
        assert_eq!(pending[1].entity, Entity::Products);
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let q = queue();
        let id = q
            .enqueue(Operation::Create, Entity::Customers, &rid("c1"), &json!({"id": "c1"}))
            .await
            .unwrap();

        assert!(q.mark_processing(id).await.unwrap());
        assert!(!q.mark_processing(id).await.unwrap());
        assert!(q.list_pending().await.unwrap().is_empty());

        q.release(id).await.unwrap();
        assert_eq!(q.list_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn completion_deletes_and_is_idempotent() {
        let q = queue();
        let id = q
            .enqueue(Operation::Delete, Entity::Customers, &rid("c1"), &json!({"id": "c1"}))
            .await
            .unwrap();

        q.mark_completed(id).await.unwrap();
        assert!(q.get(id).await.unwrap().is_none());

        q.mark_completed(id).await.unwrap();
        q.mark_completed(QueueItemId::from(9_999)).await.unwrap();
        assert_eq!(q.stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let q = queue();
        let id = q
            .enqueue(Operation::Create, Entity::Customers, &rid("c1"), &json!({"id": "c1"}))
            .await
            .unwrap();

        for attempt in 1..MAX_RETRIES {
            assert!(q.mark_processing(id).await.unwrap());
            let item = q.mark_failed(id, "HTTP 500").await.unwrap().unwrap();
            assert_eq!(item.retries, attempt);
            assert_eq!(item.status, QueueStatus::Pending);
            assert_eq!(item.error.as_deref(), Some("HTTP 500"));
        }

        assert!(q.mark_processing(id).await.unwrap());
        let item = q.mark_failed(id, "HTTP 500").await.unwrap().unwrap();
        assert_eq!(item.retries, MAX_RETRIES);
        assert_eq!(item.status, QueueStatus::Failed);
        assert!(q.list_pending().await.unwrap().is_empty());

        // Terminal: no further increments, no claims.
        assert!(q.mark_failed(id, "again").await.unwrap().is_none());
        assert_eq!(q.get(id).await.unwrap().unwrap().retries, MAX_RETRIES);
        assert!(matches!(
            q.mark_processing(id).await,
            Err(QueueError::Exhausted { retries: MAX_RETRIES, .. })
        ));
    }

    #[tokio::test]
    async fn retry_failed_restores_pending() {
        let q = queue();
        let id = q
            .enqueue(Operation::Update, Entity::Customers, &rid("c1"), &json!({"id": "c1"}))
            .await
            .unwrap();
        for _ in 0..MAX_RETRIES {
            q.mark_failed(id, "boom").await.unwrap();
        }
        assert_eq!(q.list_failed().await.unwrap().len(), 1);

        assert_eq!(q.retry_failed().await.unwrap(), 1);
        let item = q.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.retries, 0);
        assert!(item.error.is_none());
    }

    #[tokio::test]
    async fn retry_reopens_records_parked_as_error() {
        let q = queue();
        q.store()
            .put(Entity::Customers, &json!({"id": "c1", "name": "Budi", "syncStatus": "error"}))
            .await
            .unwrap();
        q.store()
            .put(Entity::Customers, &json!({"id": "c2", "name": "Sari", "syncStatus": "error"}))
            .await
            .unwrap();
        let a = q
            .enqueue(Operation::Update, Entity::Customers, &rid("c1"), &json!({"id": "c1"}))
            .await
            .unwrap();
        let b = q
            .enqueue(Operation::Update, Entity::Customers, &rid("c2"), &json!({"id": "c2"}))
            .await
            .unwrap();
        for _ in 0..MAX_RETRIES {
            q.mark_failed(a, "boom").await.unwrap();
            q.mark_failed(b, "boom").await.unwrap();
        }

        q.retry(a).await.unwrap();
        let c1 = q.store().get(Entity::Customers, &rid("c1")).await.unwrap().unwrap();
        let c2 = q.store().get(Entity::Customers, &rid("c2")).await.unwrap().unwrap();
        assert_eq!(c1["syncStatus"], "pending");
        assert_eq!(c2["syncStatus"], "error");

        q.retry_failed().await.unwrap();
        let c2 = q.store().get(Entity::Customers, &rid("c2")).await.unwrap().unwrap();
        assert_eq!(c2["syncStatus"], "pending");
    }

    #[tokio::test]
    async fn rekey_moves_unconfirmed_mutations_to_the_new_id() {
        let q = queue();
        let temp = rid("temp-1");
        let update = q
            .enqueue(Operation::Update, Entity::Customers, &temp, &json!({"id": "temp-1", "name": "Budi"}))
            .await
            .unwrap();
        let delete = q
            .enqueue(Operation::Delete, Entity::Customers, &temp, &json!({"id": "temp-1"}))
            .await
            .unwrap();
        q.enqueue(Operation::Update, Entity::Products, &temp, &json!({"id": "temp-1"}))
            .await
            .unwrap();

        let n = q.rekey(Entity::Customers, &temp, &rid("srv-1")).await.unwrap();
        assert_eq!(n, 2);

        let item = q.get(update).await.unwrap().unwrap();
        assert_eq!(item.entity_id, rid("srv-1"));
        assert_eq!(item.data, json!({"id": "srv-1", "name": "Budi"}));
        assert_eq!(q.get(delete).await.unwrap().unwrap().data, json!({"id": "srv-1"}));
        assert!(q.has_unsynced_for(Entity::Products, &temp).await.unwrap());
        assert!(!q.has_unsynced_for(Entity::Customers, &temp).await.unwrap());
    }

    #[tokio::test]
    async fn single_retry_and_remove() {
        let q = queue();
        let id = q
            .enqueue(Operation::Update, Entity::Customers, &rid("c1"), &json!({"id": "c1"}))
            .await
            .unwrap();
        for _ in 0..MAX_RETRIES {
            q.mark_failed(id, "boom").await.unwrap();
        }

        let item = q.retry(id).await.unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert!(matches!(
            q.retry(QueueItemId::from(404)).await,
            Err(QueueError::NotFound(_))
        ));

        assert!(q.remove(id).await.unwrap());
        assert!(!q.remove(id).await.unwrap());
    }

    #[tokio::test]
    async fn stats_and_pending_lookup() {
        let q = queue();
        let a = q
            .enqueue(Operation::Create, Entity::Customers, &rid("c1"), &json!({"id": "c1"}))
            .await
            .unwrap();
        let b = q
            .enqueue(Operation::Create, Entity::Customers, &rid("c2"), &json!({"id": "c2"}))
            .await
            .unwrap();
        q.enqueue(Operation::Create, Entity::Customers, &rid("c3"), &json!({"id": "c3"}))
            .await
            .unwrap();

        q.mark_processing(a).await.unwrap();
        for _ in 0..MAX_RETRIES {
            q.mark_failed(b, "boom").await.unwrap();
        }

        let stats = q.stats().await.unwrap();
        assert_eq!(
            stats,
            QueueStats {
                pending: 1,
                processing: 1,
                completed: 0,
                failed: 1,
                total: 3
            }
        );

        assert!(q.has_unsynced_for(Entity::Customers, &rid("c1")).await.unwrap());
        assert!(q.has_unsynced_for(Entity::Customers, &rid("c2")).await.unwrap());
        assert!(!q.has_unsynced_for(Entity::Customers, &rid("c9")).await.unwrap());
        assert!(!q.has_unsynced_for(Entity::Suppliers, &rid("c3")).await.unwrap());

        assert_eq!(q.requeue_processing().await.unwrap(), 1);
        assert_eq!(q.stats().await.unwrap().pending, 2);
    }

    #[tokio::test]
    async fn clear_completed_purges_leftovers() {
        let q = queue();
        let id = q
            .enqueue(Operation::Create, Entity::Customers, &rid("c1"), &json!({"id": "c1"}))
            .await
            .unwrap();
        let pool = q.store().open().await.unwrap();
        sqlx::query("UPDATE sync_queue SET status = 'completed' WHERE id = ?1")
            .bind(id.get())
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(q.stats().await.unwrap().completed, 1);
        assert_eq!(q.clear_completed().await.unwrap(), 1);
        assert_eq!(q.stats().await.unwrap().total, 0);
    }

    #[test]
    fn drain_guard_is_shared_between_clones() {
        let q = queue();
        let other = q.clone();

        let guard = q.begin_drain().unwrap();
        assert!(other.begin_drain().is_none());
        assert!(other.is_draining());

        drop(guard);
        assert!(other.begin_drain().is_some());
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let item = QueueItem {
            id: QueueItemId::from(1),
            operation: Operation::Create,
            entity: Entity::StockMovements,
            entity_id: rid("m1"),
            data: json!({"id": "m1"}),
            timestamp: Utc::now(),
            retries: 0,
            status: QueueStatus::Pending,
            error: None,
        };
        let v = serde_json::to_value(&item).unwrap();
        assert_eq!(v["entity"], "stock_movements");
        assert_eq!(v["entityId"], "m1");
        assert_eq!(v["operation"], "create");
        assert!(v.get("error").is_none());
    }
}
