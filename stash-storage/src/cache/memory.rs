//! In-memory cache client.
//!
//! Behaves like a single-node distributed cache: string keys, optional TTL
//! per entry, an optional entry cap with oldest-first eviction, and
//! hit/miss/item statistics. Failure toggles let tests drive the
//! coordinator's warning paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stash_core::{CacheError, EntityRecord, MemoryCacheConfig, StashResult};

use super::traits::{CacheClient, CacheResult, CacheStats};

#[derive(Debug, Clone)]
struct CachedEntry {
    record: EntityRecord,
    cached_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    /// Insertion order, used to pick the eviction victim.
    seq: u64,
}

impl CachedEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CachedEntry>,
    next_seq: u64,
}

impl CacheInner {
    fn purge_expired(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    /// Look up a live entry, dropping it if it has expired.
    fn live(&mut self, key: &str, now: DateTime<Utc>) -> Option<&CachedEntry> {
        let expired = self.entries.get(key).map(|entry| entry.is_expired(now));
        match expired {
            Some(false) => self.entries.get(key),
            Some(true) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn oldest_key(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.seq)
            .map(|(key, _)| key.clone())
    }
}

/// In-memory [`CacheClient`].
#[derive(Debug, Default)]
pub struct InMemoryCache {
    inner: RwLock<CacheInner>,
    config: MemoryCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl InMemoryCache {
    /// Create an unbounded cache with no default TTL.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache with the given sizing and expiry.
    pub fn with_config(config: MemoryCacheConfig) -> StashResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::default()
        })
    }

    pub fn config(&self) -> &MemoryCacheConfig {
        &self.config
    }

    /// Make `set`, `delete` and `clear_all` fail until switched off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `get` and `contains` fail until switched off.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// When the live entry under `key` was cached.
    pub fn cached_at(&self, key: &str) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        let inner = self.inner.read().ok()?;
        inner
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.cached_at)
    }

    fn check_reads(&self) -> CacheResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable {
                reason: "reads disabled".to_string(),
            });
        }
        Ok(())
    }

    fn check_writes(&self) -> CacheResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable {
                reason: "writes disabled".to_string(),
            });
        }
        Ok(())
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn lookup(&self, key: &str) -> CacheResult<Option<EntityRecord>> {
        self.check_reads()?;
        let now = Utc::now();
        let found = {
            let mut inner = self.inner.write().map_err(|_| CacheError::LockPoisoned)?;
            inner.live(key, now).map(|entry| entry.record.clone())
        };
        self.record_lookup(found.is_some());
        Ok(found)
    }

    /// Insert an entry, or with `only_if_absent` keep a live existing one.
    ///
    /// Expired entries are purged before a new key is inserted, then the
    /// oldest entries are evicted while the cache is at capacity.
    fn insert(
        &self,
        key: &str,
        record: &EntityRecord,
        expiration: Option<Duration>,
        only_if_absent: bool,
    ) -> CacheResult<bool> {
        self.check_writes()?;
        let now = Utc::now();
        let expires_at = expiration
            .or(self.config.default_ttl)
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));

        let mut inner = self.inner.write().map_err(|_| CacheError::LockPoisoned)?;

        if only_if_absent && inner.live(key, now).is_some() {
            return Ok(false);
        }

        if !inner.entries.contains_key(key) {
            inner.purge_expired(now);
            if let Some(max) = self.config.max_entries {
                while inner.entries.len() >= max {
                    let Some(victim) = inner.oldest_key() else {
                        break;
                    };
                    inner.entries.remove(&victim);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %victim, "evicted cache entry at capacity");
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key.to_string(),
            CachedEntry {
                record: record.clone(),
                cached_at: now,
                expires_at,
                seq,
            },
        );
        Ok(true)
    }
}

#[async_trait]
impl CacheClient for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<EntityRecord>> {
        self.lookup(key)
    }

    async fn contains(&self, key: &str) -> CacheResult<bool> {
        self.lookup(key).map(|found| found.is_some())
    }

    async fn set(
        &self,
        key: &str,
        record: &EntityRecord,
        expiration: Option<Duration>,
    ) -> CacheResult<()> {
        self.insert(key, record, expiration, false).map(|_| ())
    }

    async fn add(
        &self,
        key: &str,
        record: &EntityRecord,
        expiration: Option<Duration>,
    ) -> CacheResult<bool> {
        self.insert(key, record, expiration, true)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.check_writes()?;
        let now = Utc::now();
        let mut inner = self.inner.write().map_err(|_| CacheError::LockPoisoned)?;
        Ok(inner
            .entries
            .remove(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn clear_all(&self) -> CacheResult<()> {
        self.check_writes()?;
        let mut inner = self.inner.write().map_err(|_| CacheError::LockPoisoned)?;
        inner.entries.clear();
        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        let now = Utc::now();
        let inner = self.inner.read().map_err(|_| CacheError::LockPoisoned)?;
        let item_count = inner
            .entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count() as u64;

        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            item_count,
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }
}
