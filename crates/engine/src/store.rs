//! Persistent local record store (SQLite), one table per entity.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use tokosync_core::record::{self, SyncStatus};
use tokosync_core::{DomainError, Entity, RecordId};

use crate::config::DatabaseLocation;
use crate::schema::{self, SCHEMA_VERSION};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open local store: {0}")]
    Init(String),
    #[error("no index '{index}' on table '{table}'")]
    UnknownIndex { table: Entity, index: String },
    #[error("index value must be a string, number or boolean, got {0}")]
    InvalidIndexValue(Value),
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] DomainError),
    #[error("unique constraint violated on '{table}': {message}")]
    Constraint { table: Entity, message: String },
    #[error("failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// SQLite-backed local record store.
///
/// Cheap to clone; clones share one lazily opened connection pool, so
/// concurrent first callers never race to create separate connections.
#[derive(Debug, Clone)]
pub struct LocalStore {
    location: DatabaseLocation,
    pool: Arc<Mutex<Option<SqlitePool>>>,
}

impl LocalStore {
    /// Create a store handle (lazy initialization).
    ///
    /// The database is opened and migrated on first use.
    pub fn new(location: DatabaseLocation) -> Self {
        Self {
            location,
            pool: Arc::new(Mutex::new(None)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(DatabaseLocation::InMemory)
    }

    pub fn location(&self) -> &DatabaseLocation {
        &self.location
    }

    /// Open the database and bring the schema up to date, once.
    ///
    /// Repeated calls return the same pool. A failed attempt leaves the handle
    /// unopened so the next call retries.
    pub async fn open(&self) -> Result<SqlitePool, StoreError> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        let pool = connect(&self.location)
            .await
            .map_err(|e| StoreError::Init(format!("{e:#}")))?;
        *guard = Some(pool.clone());
        Ok(pool)
    }

    /// All records of a table, in insertion order.
    pub async fn get_all(&self, table: Entity) -> Result<Vec<Value>, StoreError> {
        let pool = self.open().await?;
        let sql = format!(r#"SELECT data FROM "{}" ORDER BY rowid ASC"#, table.as_str());

        let rows = sqlx::query(&sql).fetch_all(&pool).await?;
        rows.into_iter().map(decode_data).collect()
    }

    pub async fn get(&self, table: Entity, key: &RecordId) -> Result<Option<Value>, StoreError> {
        let pool = self.open().await?;
        let sql = format!(r#"SELECT data FROM "{}" WHERE id = ?1"#, table.as_str());

        let row = sqlx::query(&sql)
            .bind(key.as_str())
            .fetch_optional(&pool)
            .await?;
        row.map(decode_data).transpose()
    }

    /// Typed read of a single record.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        table: Entity,
        key: &RecordId,
    ) -> Result<Option<T>, StoreError> {
        match self.get(table, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Upsert a record, replacing any existing record with the same `id`.
    pub async fn put(&self, table: Entity, value: &Value) -> Result<RecordId, StoreError> {
        let key = RecordId::of_record(value)?;
        let pool = self.open().await?;
        let payload = serde_json::to_string(value)?;

        sqlx::query(&upsert_sql(table))
            .bind(key.as_str())
            .bind(&payload)
            .bind(Utc::now().to_rfc3339())
            .execute(&pool)
            .await
            .map_err(|e| classify(table, e))?;

        Ok(key)
    }

    /// Atomically move the record stored under `old` to the id carried by
    /// `value` (e.g. a server-assigned id replacing a temporary one).
    pub async fn replace_key(
        &self,
        table: Entity,
        old: &RecordId,
        value: &Value,
    ) -> Result<RecordId, StoreError> {
        let key = RecordId::of_record(value)?;
        let pool = self.open().await?;
        let payload = serde_json::to_string(value)?;
        let delete = format!(r#"DELETE FROM "{}" WHERE id = ?1"#, table.as_str());

        let mut tx = pool.begin().await?;
        sqlx::query(&delete)
            .bind(old.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query(&upsert_sql(table))
            .bind(key.as_str())
            .bind(&payload)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| classify(table, e))?;
        tx.commit().await?;

        Ok(key)
    }

    /// Overwrite only the `syncStatus` of a stored record. Returns `false` when
    /// there is no record under `key`.
    pub async fn set_sync_status(
        &self,
        table: Entity,
        key: &RecordId,
        status: SyncStatus,
    ) -> Result<bool, StoreError> {
        let Some(mut value) = self.get(table, key).await? else {
            return Ok(false);
        };
        value
            .as_object_mut()
            .ok_or(DomainError::NotAnObject)?
            .insert(record::SYNC_STATUS_FIELD.to_string(), Value::from(status.as_str()));
        self.put(table, &value).await?;
        Ok(true)
    }

    /// Remove a record. Returns whether a record was removed.
    pub async fn delete(&self, table: Entity, key: &RecordId) -> Result<bool, StoreError> {
        let pool = self.open().await?;
        let sql = format!(r#"DELETE FROM "{}" WHERE id = ?1"#, table.as_str());

        let result = sqlx::query(&sql).bind(key.as_str()).execute(&pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Records whose indexed field equals `value`.
    pub async fn get_by_index(
        &self,
        table: Entity,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Value>, StoreError> {
        let def = schema::find_index(table, index).ok_or_else(|| StoreError::UnknownIndex {
            table,
            index: index.to_string(),
        })?;

        let pool = self.open().await?;
        let sql = format!(
            r#"SELECT data FROM "{}" WHERE {} = ?1 ORDER BY rowid ASC"#,
            table.as_str(),
            schema::index_expr(def)
        );

        let query = sqlx::query(&sql);
        let query = match value {
            Value::String(s) => query.bind(s.clone()),
            Value::Bool(b) => query.bind(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => match n.as_f64() {
                    Some(f) => query.bind(f),
                    None => return Err(StoreError::InvalidIndexValue(value.clone())),
                },
            },
            other => return Err(StoreError::InvalidIndexValue(other.clone())),
        };

        let rows = query.fetch_all(&pool).await?;
        rows.into_iter().map(decode_data).collect()
    }

    pub async fn count(&self, table: Entity) -> Result<u64, StoreError> {
        let pool = self.open().await?;
        let sql = format!(r#"SELECT COUNT(*) FROM "{}""#, table.as_str());

        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&pool).await?;
        Ok(count as u64)
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Open a pool at `location` and migrate it to [`SCHEMA_VERSION`].
async fn connect(location: &DatabaseLocation) -> anyhow::Result<SqlitePool> {
    let pool = match location {
        DatabaseLocation::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create local store directory at {:?}", parent)
                })?;
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal);

            SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await
                .with_context(|| format!("failed to create SQLite pool at {:?}", path))?
        }
        DatabaseLocation::InMemory => {
            // Each in-memory connection is its own database: pin exactly one
            // connection for the lifetime of the pool.
            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .context("invalid in-memory SQLite URL")?;

            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
                .context("failed to create in-memory SQLite pool")?
        }
    };

    migrate(&pool).await?;
    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    let current: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await
        .context("failed to read schema version")?;

    if current > SCHEMA_VERSION {
        anyhow::bail!(
            "local store schema v{current} is newer than supported v{SCHEMA_VERSION}"
        );
    }
    if current == SCHEMA_VERSION {
        return Ok(());
    }

    tracing::info!(from = current, to = SCHEMA_VERSION, "upgrading local store schema");

    for stmt in schema::statements() {
        sqlx::query(&stmt)
            .execute(pool)
            .await
            .with_context(|| format!("failed to apply schema statement: {}", stmt.trim()))?;
    }

    let bump = format!("PRAGMA user_version = {SCHEMA_VERSION}");
    sqlx::query(&bump)
        .execute(pool)
        .await
        .context("failed to record schema version")?;

    Ok(())
}

fn upsert_sql(table: Entity) -> String {
    format!(
        r#"
        INSERT INTO "{}" (id, data, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(id)
        DO UPDATE SET
            data = excluded.data,
            updated_at = excluded.updated_at
        "#,
        table.as_str()
    )
}

fn decode_data(row: sqlx::sqlite::SqliteRow) -> Result<Value, StoreError> {
    let data: String = row.try_get("data")?;
    Ok(serde_json::from_str(&data)?)
}

fn classify(table: Entity, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Constraint {
            table,
            message: db.message().to_string(),
        },
        _ => StoreError::Database(err),
    }
}
