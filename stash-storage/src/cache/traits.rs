//! Cache client trait and statistics.
//!
//! This module defines the narrow interface the coordinator uses to talk to a
//! distributed key-value cache.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stash_core::EntityRecord;
use std::time::Duration;

/// Result type for cache client calls.
pub type CacheResult<T> = Result<T, stash_core::CacheError>;

/// Cache client trait for pluggable cache implementations.
///
/// Keys are canonical entity keys (see [`stash_core::EntityKey::canonical`]).
/// Implementations must be thread-safe.
///
/// # Statistics
///
/// Every logical lookup counts exactly once as a hit or a miss. Lookups are
/// `get` and `contains`; `set`, `add`, `delete`, `clear_all` and `stats`
/// leave the hit and miss counters alone.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Get a record from the cache.
    async fn get(&self, key: &str) -> CacheResult<Option<EntityRecord>>;

    /// Check whether a live entry exists. Counts as a lookup.
    async fn contains(&self, key: &str) -> CacheResult<bool>;

    /// Store a record, replacing any existing entry.
    ///
    /// `expiration` overrides the backend's default TTL for this entry.
    async fn set(
        &self,
        key: &str,
        record: &EntityRecord,
        expiration: Option<Duration>,
    ) -> CacheResult<()>;

    /// Store a record only if no live entry exists under `key`.
    ///
    /// Returns whether the record was stored. Used for read-path fills so a
    /// fill can never replace an entry written by a save.
    async fn add(
        &self,
        key: &str,
        record: &EntityRecord,
        expiration: Option<Duration>,
    ) -> CacheResult<bool>;

    /// Remove an entry. Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Remove every entry. Hit and miss counters are kept.
    async fn clear_all(&self) -> CacheResult<()>;

    /// Get cache statistics.
    async fn stats(&self) -> CacheResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of lookups that found a live entry.
    pub hits: u64,
    /// Number of lookups that found nothing.
    pub misses: u64,
    /// Number of live entries at the time of the call.
    pub item_count: u64,
    /// Number of entries evicted due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
