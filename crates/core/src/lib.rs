//! `tokosync-core`: domain building blocks shared by the sync engine.
//!
//! This crate contains **pure domain** primitives (no storage, no network):
//! entity names, record identifiers, the local record envelope and the typed
//! payloads of the business entities the client works with.

pub mod entity;
pub mod error;
pub mod id;
pub mod models;
pub mod record;

pub use entity::Entity;
pub use error::DomainError;
pub use id::{QueueItemId, RecordId};
pub use models::{Customer, Invoice, Product};
pub use record::{LocalRecord, SyncStatus};
