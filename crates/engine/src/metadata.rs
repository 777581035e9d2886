//! Process-wide sync bookkeeping: last successful sync and a sync counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::store::{LocalStore, StoreError};

const LAST_SYNC_KEY: &str = "last_sync";
const SYNC_VERSION_KEY: &str = "sync_version";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    pub last_sync: Option<DateTime<Utc>>,
    /// Incremented on every successful sync; never decreases.
    pub sync_version: u64,
}

#[derive(Debug, Clone)]
pub struct SyncMetadataStore {
    store: LocalStore,
}

impl SyncMetadataStore {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Result<SyncMetadata, StoreError> {
        let pool = self.store.open().await?;
        let rows = sqlx::query("SELECT key, value FROM sync_metadata")
            .fetch_all(&pool)
            .await?;

        let mut meta = SyncMetadata::default();
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            match key.as_str() {
                LAST_SYNC_KEY => {
                    meta.last_sync = DateTime::parse_from_rfc3339(&value)
                        .map(|dt| dt.with_timezone(&Utc))
                        .ok();
                }
                SYNC_VERSION_KEY => meta.sync_version = value.parse().unwrap_or_default(),
                _ => {}
            }
        }
        Ok(meta)
    }

    /// Stamp `last_sync = now` and bump the sync version.
    pub async fn record_successful_sync(&self) -> Result<SyncMetadata, StoreError> {
        let pool = self.store.open().await?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO sync_metadata (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(LAST_SYNC_KEY)
        .bind(now.to_rfc3339())
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO sync_metadata (key, value)
            VALUES (?1, '1')
            ON CONFLICT(key)
            DO UPDATE SET value = CAST(CAST(sync_metadata.value AS INTEGER) + 1 AS TEXT)
            "#,
        )
        .bind(SYNC_VERSION_KEY)
        .execute(&pool)
        .await?;

        let meta = self.load().await?;
        tracing::debug!(sync_version = meta.sync_version, "recorded successful sync");
        Ok(meta)
    }
}
