//! `tokosync-engine`
//!
//! **Responsibility:** local-first synchronization engine.
//!
//! This crate provides:
//! - A persistent, indexed local record store (SQLite, one table per entity)
//! - A durable sync queue of unconfirmed mutations with bounded retry
//! - An offline-first read/write facade ([`DataStore`])
//! - An HTTP client that short-circuits when offline and queues failed writes
//! - An optional background worker that drains the queue when connectivity returns
//!
//! Local writes always land first; the backend is reconciled opportunistically
//! with last-write-wins semantics.

pub mod api;
pub mod config;
pub mod connectivity;
pub mod data_store;
pub mod metadata;
pub mod queue;
pub mod replay;
pub mod schema;
pub mod store;
pub mod worker;

pub use api::{ApiClient, ApiError, ApiResponse, RequestOptions};
pub use config::{ConfigError, DatabaseLocation, SyncConfig};
pub use connectivity::{Connectivity, ConnectivityFlag, ConnectivityState};
pub use data_store::{DataStore, DataStoreError, RemoteCall, remote};
pub use metadata::{SyncMetadata, SyncMetadataStore};
pub use queue::{MAX_RETRIES, Operation, QueueError, QueueItem, QueueStats, QueueStatus, SyncQueue};
pub use replay::SyncReport;
pub use store::{LocalStore, StoreError};
pub use worker::{SyncEvent, SyncWorker, SyncWorkerHandle};

pub use tokosync_core::{Entity, LocalRecord, QueueItemId, RecordId, SyncStatus};
