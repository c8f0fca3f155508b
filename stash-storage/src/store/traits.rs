//! Persistent entity store trait.

use async_trait::async_trait;
use stash_core::{EntityKey, EntityRecord, StoreError};

/// Result type for store client calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable key-value entity store.
///
/// This trait abstracts over the actual persistence backend. Only single-key
/// operations are exposed; queries and transactions belong to the backend.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Write a record under `key`, replacing any previous version.
    async fn put(&self, key: &EntityKey, record: &EntityRecord) -> StoreResult<()>;

    /// Read the record under `key`.
    async fn get(&self, key: &EntityKey) -> StoreResult<Option<EntityRecord>>;

    /// Delete the record under `key`. Returns whether it existed.
    async fn delete(&self, key: &EntityKey) -> StoreResult<bool>;

    /// Allocate a fresh numeric id for `kind`. Ids are never reused.
    async fn allocate_id(&self, kind: &str) -> StoreResult<i64>;
}
