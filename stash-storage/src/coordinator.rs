//! Cache-aside coordinator.
//!
//! Routes single-entity saves and loads through the persistent store and,
//! for cache-eligible kinds only, the cache.
//!
//! # Consistency contract
//!
//! - A cache entry is only written after a successful store write or a
//!   successful store read of a cache-eligible kind.
//! - A failed store write leaves the cache untouched.
//! - Cache failures never fail the operation. They are returned or counted
//!   as [`CacheWarning`]s and logged; the cache may end up cold, never stale.
//! - `save` awaits the cache write before returning, so a `load` issued after
//!   `save` resolves observes the populated entry.
//! - Uncached kinds never read the cache, and saving one deletes any stray
//!   entry under its key.
//!
//! No locking spans the store call and the cache call, so a load can read a
//! version from the store that a concurrent save or delete has already
//! replaced. Two rules keep such a load from leaving that version cached:
//!
//! - Read-path fills go through [`CacheClient::add`], which never replaces a
//!   live entry. A save's `set` always wins over a fill.
//! - Every successful store write or delete bumps a per-key write epoch
//!   before touching the cache. A fill whose key changed epoch while the
//!   store was being read is deleted again.
//!
//! Epochs are local to one coordinator and its clones. Coordinators in other
//! processes sharing the cache are only covered by the `add` rule.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use stash_core::{
    CacheWarning, CoordinatorConfig, Entity, EntityKey, EntityRecord, IdentityValue,
    RecordError, StashResult, TypeDescriptor,
};

use crate::cache::CacheClient;
use crate::registry::EntityRegistry;
use crate::store::EntityStore;

/// Outcome of a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saved {
    /// Key the record was persisted under (store-allocated if it had none).
    pub key: EntityKey,
    /// Set when the store write succeeded but the cache could not follow.
    pub warning: Option<CacheWarning>,
}

/// Outcome of a successful delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deleted {
    /// Whether the store held a record under the key.
    pub existed: bool,
    /// Set when the cache entry could not be removed.
    pub warning: Option<CacheWarning>,
}

/// Snapshot of coordinator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub saves: u64,
    pub loads: u64,
    /// Loads answered from the cache.
    pub cache_served: u64,
    /// Loads answered by the store, found or not.
    pub store_served: u64,
    pub cache_warnings: u64,
}

#[derive(Debug, Default)]
struct Counters {
    saves: AtomicU64,
    loads: AtomicU64,
    cache_served: AtomicU64,
    store_served: AtomicU64,
    cache_warnings: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            saves: self.saves.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            cache_served: self.cache_served.load(Ordering::Relaxed),
            store_served: self.store_served.load(Ordering::Relaxed),
            cache_warnings: self.cache_warnings.load(Ordering::Relaxed),
        }
    }
}

/// Number of write-epoch stripes. Keys hashing to the same stripe share an
/// epoch.
const EPOCH_STRIPES: usize = 64;

/// Per-key write counters, striped by canonical key.
#[derive(Debug)]
struct WriteEpochs {
    stripes: Box<[AtomicU64]>,
}

impl WriteEpochs {
    fn new() -> Self {
        Self {
            stripes: (0..EPOCH_STRIPES).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn stripe(&self, canonical: &str) -> &AtomicU64 {
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        &self.stripes[(hasher.finish() % EPOCH_STRIPES as u64) as usize]
    }

    fn current(&self, canonical: &str) -> u64 {
        self.stripe(canonical).load(Ordering::SeqCst)
    }

    fn bump(&self, canonical: &str) {
        self.stripe(canonical).fetch_add(1, Ordering::SeqCst);
    }
}

/// Cache-aside coordinator over a cache client and an entity store.
///
/// # Type Parameters
///
/// - `C`: the cache client
/// - `S`: the persistent entity store
///
/// # Example
///
/// ```ignore
/// let registry = Arc::new(EntityRegistry::new());
/// registry.register(TypeDescriptor::new("User").cached())?;
///
/// let coordinator = CacheAsideCoordinator::with_defaults(
///     registry,
///     Arc::new(InMemoryCache::new()),
///     Arc::new(InMemoryStore::new()),
/// );
///
/// let saved = coordinator
///     .save(EntityRecord::new(EntityKey::new("User", "ann"), json!({"name": "Ann"})))
///     .await?;
/// let loaded = coordinator.load("User", "ann").await?;
/// ```
pub struct CacheAsideCoordinator<C, S>
where
    C: CacheClient,
    S: EntityStore,
{
    registry: Arc<EntityRegistry>,
    cache: Arc<C>,
    store: Arc<S>,
    config: CoordinatorConfig,
    counters: Arc<Counters>,
    epochs: Arc<WriteEpochs>,
}

impl<C, S> CacheAsideCoordinator<C, S>
where
    C: CacheClient,
    S: EntityStore,
{
    /// Create a coordinator, validating `config`.
    pub fn new(
        registry: Arc<EntityRegistry>,
        cache: Arc<C>,
        store: Arc<S>,
        config: CoordinatorConfig,
    ) -> StashResult<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            cache,
            store,
            config,
            counters: Arc::new(Counters::default()),
            epochs: Arc::new(WriteEpochs::new()),
        })
    }

    /// Create a coordinator with the default configuration.
    pub fn with_defaults(registry: Arc<EntityRegistry>, cache: Arc<C>, store: Arc<S>) -> Self {
        Self {
            registry,
            cache,
            store,
            config: CoordinatorConfig::default(),
            counters: Arc::new(Counters::default()),
            epochs: Arc::new(WriteEpochs::new()),
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Counters accumulated since construction, shared across clones.
    pub fn stats(&self) -> CoordinatorStats {
        self.counters.snapshot()
    }

    /// Persist a record, then populate or invalidate the cache by kind.
    ///
    /// The payload's identity field must agree with the record key; if the
    /// field is absent it is filled in from the key.
    #[tracing::instrument(level = "debug", skip_all, fields(key = %record.key))]
    pub async fn save(&self, mut record: EntityRecord) -> StashResult<Saved> {
        let descriptor = self.registry.descriptor(record.kind())?;
        reconcile_identity(&descriptor, &mut record)?;

        self.store.put(&record.key, &record).await?;
        Counters::bump(&self.counters.saves);

        let canonical = record.key.canonical();
        self.epochs.bump(&canonical);
        let warning = if descriptor.is_cacheable() {
            let expiration = self.expiration_for(&descriptor);
            match self.cache.set(&canonical, &record, expiration).await {
                Ok(()) => {
                    tracing::debug!("cache populated after store write");
                    None
                }
                Err(e) => Some(self.note_warning(CacheWarning::WriteFailed {
                    key: canonical,
                    reason: e.to_string(),
                })),
            }
        } else if self.config.invalidate_uncached {
            match self.cache.delete(&canonical).await {
                Ok(true) => {
                    tracing::debug!("removed stray cache entry for uncached kind");
                    None
                }
                Ok(false) => None,
                Err(e) => Some(self.note_warning(CacheWarning::InvalidateFailed {
                    key: canonical,
                    reason: e.to_string(),
                })),
            }
        } else {
            None
        };

        Ok(Saved {
            key: record.key,
            warning,
        })
    }

    /// Persist a typed entity.
    ///
    /// When the entity carries no identity the store allocates a numeric id,
    /// which is written back into the identity field before saving.
    pub async fn save_entity<T: Entity>(&self, entity: &T) -> StashResult<Saved> {
        let descriptor = self.registry.descriptor(T::descriptor().kind())?;
        let mut payload = serde_json::to_value(entity)?;

        let id = match descriptor.identity_of(&payload)? {
            Some(id) => id,
            None => {
                let id = IdentityValue::Id(self.store.allocate_id(descriptor.kind()).await?);
                descriptor.set_identity(&mut payload, &id)?;
                tracing::debug!(kind = descriptor.kind(), %id, "allocated entity id");
                id
            }
        };

        self.save(EntityRecord::new(EntityKey::new(descriptor.kind(), id), payload))
            .await
    }

    /// Load a record by kind and identity.
    ///
    /// Cached kinds try the cache first and fill it from the store on a miss.
    /// Uncached kinds go straight to the store. A missing entity is `Ok(None)`.
    #[tracing::instrument(level = "debug", skip_all, fields(kind = kind))]
    pub async fn load(
        &self,
        kind: &str,
        id: impl Into<IdentityValue>,
    ) -> StashResult<Option<EntityRecord>> {
        let descriptor = self.registry.descriptor(kind)?;
        let key = EntityKey::new(kind, id);
        Counters::bump(&self.counters.loads);

        if !descriptor.is_cacheable() {
            return self.load_from_store(&key).await;
        }

        let canonical = key.canonical();
        match self.cache.get(&canonical).await {
            Ok(Some(record)) => {
                Counters::bump(&self.counters.cache_served);
                tracing::debug!(key = %canonical, "cache hit");
                return Ok(Some(record));
            }
            Ok(None) => tracing::debug!(key = %canonical, "cache miss"),
            Err(e) => {
                self.note_warning(CacheWarning::ReadFailed {
                    key: canonical.clone(),
                    reason: e.to_string(),
                });
            }
        }

        let epoch = self.epochs.current(&canonical);
        let found = self.load_from_store(&key).await?;

        if let (Some(record), true) = (&found, self.config.fill_on_read) {
            self.fill(&descriptor, &canonical, record, epoch).await;
        }

        Ok(found)
    }

    /// Load and decode a typed entity.
    pub async fn load_entity<T: Entity>(
        &self,
        id: impl Into<IdentityValue>,
    ) -> StashResult<Option<T>> {
        let descriptor = T::descriptor();
        self.load(descriptor.kind(), id)
            .await?
            .map(|record| record.decode())
            .transpose()
    }

    /// Delete from the store, then drop the cache entry.
    ///
    /// The cache entry is dropped for every kind, cached or not, so a kind
    /// whose eligibility changed between runs leaves nothing behind.
    #[tracing::instrument(level = "debug", skip_all, fields(kind = kind))]
    pub async fn delete(&self, kind: &str, id: impl Into<IdentityValue>) -> StashResult<Deleted> {
        self.registry.descriptor(kind)?;
        let key = EntityKey::new(kind, id);

        let existed = self.store.delete(&key).await?;

        let canonical = key.canonical();
        self.epochs.bump(&canonical);
        let warning = match self.cache.delete(&canonical).await {
            Ok(_) => None,
            Err(e) => Some(self.note_warning(CacheWarning::InvalidateFailed {
                key: canonical,
                reason: e.to_string(),
            })),
        };

        Ok(Deleted { existed, warning })
    }

    /// Drop the cache entry for a key without touching the store.
    ///
    /// Unlike the other operations, cache failures are returned here.
    pub async fn evict(&self, kind: &str, id: impl Into<IdentityValue>) -> StashResult<bool> {
        self.registry.descriptor(kind)?;
        let canonical = EntityKey::new(kind, id).canonical();
        Ok(self.cache.delete(&canonical).await?)
    }

    /// Save records in order, stopping at the first error.
    pub async fn save_all<I>(&self, records: I) -> StashResult<Vec<Saved>>
    where
        I: IntoIterator<Item = EntityRecord>,
    {
        let mut saved = Vec::new();
        for record in records {
            saved.push(self.save(record).await?);
        }
        Ok(saved)
    }

    /// Load records of one kind in order, stopping at the first error.
    pub async fn load_all<I, V>(&self, kind: &str, ids: I) -> StashResult<Vec<Option<EntityRecord>>>
    where
        I: IntoIterator<Item = V>,
        V: Into<IdentityValue>,
    {
        let mut loaded = Vec::new();
        for id in ids {
            loaded.push(self.load(kind, id).await?);
        }
        Ok(loaded)
    }

    async fn load_from_store(&self, key: &EntityKey) -> StashResult<Option<EntityRecord>> {
        let found = self.store.get(key).await?;
        Counters::bump(&self.counters.store_served);
        Ok(found)
    }

    /// Populate the cache from a store read taken at write epoch `epoch`.
    async fn fill(
        &self,
        descriptor: &TypeDescriptor,
        canonical: &str,
        record: &EntityRecord,
        epoch: u64,
    ) {
        let expiration = self.expiration_for(descriptor);
        match self.cache.add(canonical, record, expiration).await {
            Ok(false) => tracing::debug!(key = %canonical, "cache already holds an entry"),
            Ok(true) if self.epochs.current(canonical) == epoch => {
                tracing::debug!(key = %canonical, "cache filled from store")
            }
            Ok(true) => {
                // A write landed during the store read; this copy may be old.
                match self.cache.delete(canonical).await {
                    Ok(_) => tracing::debug!(key = %canonical, "dropped fill raced by a write"),
                    Err(e) => {
                        self.note_warning(CacheWarning::InvalidateFailed {
                            key: canonical.to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            Err(e) => {
                self.note_warning(CacheWarning::WriteFailed {
                    key: canonical.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    fn expiration_for(&self, descriptor: &TypeDescriptor) -> Option<Duration> {
        descriptor
            .policy()
            .expiration()
            .or(self.config.default_expiration)
    }

    fn note_warning(&self, warning: CacheWarning) -> CacheWarning {
        Counters::bump(&self.counters.cache_warnings);
        tracing::warn!(key = warning.key(), error = %warning, "cache left cold");
        warning
    }
}

impl<C, S> Clone for CacheAsideCoordinator<C, S>
where
    C: CacheClient,
    S: EntityStore,
{
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            cache: Arc::clone(&self.cache),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            counters: Arc::clone(&self.counters),
            epochs: Arc::clone(&self.epochs),
        }
    }
}

/// Make the payload's identity field agree with the record key.
fn reconcile_identity(descriptor: &TypeDescriptor, record: &mut EntityRecord) -> StashResult<()> {
    match descriptor.identity_of(&record.payload)? {
        Some(found) if &found == record.key.id() => Ok(()),
        Some(found) => Err(RecordError::IdentityMismatch {
            field: descriptor.identity_field_name().to_string(),
            expected: format!("{:?}", record.key.id()),
            found: format!("{:?}", found),
        }
        .into()),
        None => descriptor.set_identity(&mut record.payload, record.key.id()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::store::{InMemoryStore, StoreResult};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;
    use serde::Deserialize;
    use serde_json::json;
    use stash_core::{RegistryError, StashError, StoreError};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ticket {
        id: Option<i64>,
        title: String,
    }

    impl Entity for Ticket {
        fn descriptor() -> TypeDescriptor {
            TypeDescriptor::new("Ticket").cached()
        }
    }

    type TestCoordinator = CacheAsideCoordinator<InMemoryCache, InMemoryStore>;

    fn setup() -> TestCoordinator {
        let registry = Arc::new(EntityRegistry::new());
        registry.register(TypeDescriptor::new("Hot").cached()).unwrap();
        registry.register(TypeDescriptor::new("Cold")).unwrap();
        registry.register_entity::<Ticket>().unwrap();
        CacheAsideCoordinator::with_defaults(
            registry,
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryStore::new()),
        )
    }

    fn record(kind: &str, id: &str) -> EntityRecord {
        EntityRecord::new(EntityKey::new(kind, id), json!({"id": id, "n": 1}))
    }

    #[tokio::test]
    async fn test_save_cached_kind_populates_cache() {
        let c = setup();
        let saved = c.save(record("Hot", "a")).await.unwrap();

        assert!(saved.warning.is_none());
        assert_eq!(
            c.cache().get(&saved.key.canonical()).await.unwrap(),
            Some(record("Hot", "a"))
        );
        assert_eq!(c.store().writes(), 1);
    }

    #[tokio::test]
    async fn test_save_uncached_kind_removes_stray_entry() {
        let c = setup();
        let stray = record("Cold", "a");
        c.cache()
            .set("Cold:n:a", &stray, None)
            .await
            .unwrap();

        c.save(record("Cold", "a")).await.unwrap();

        assert_eq!(c.cache().stats().await.unwrap().item_count, 0);
    }

    #[tokio::test]
    async fn test_save_uncached_without_invalidation_leaves_cache_alone() {
        let registry = Arc::new(EntityRegistry::new());
        registry.register(TypeDescriptor::new("Cold")).unwrap();
        let c = CacheAsideCoordinator::new(
            registry,
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryStore::new()),
            CoordinatorConfig::new().with_invalidate_uncached(false),
        )
        .unwrap();
        c.cache().set_fail_writes(true);

        // No cache call is made, so the failing cache raises no warning.
        let saved = c.save(record("Cold", "a")).await.unwrap();
        assert!(saved.warning.is_none());
    }

    #[tokio::test]
    async fn test_save_unregistered_kind_has_no_effect() {
        let c = setup();
        let result = c.save(record("Ghost", "a")).await;

        assert!(matches!(
            result,
            Err(StashError::Registry(RegistryError::UnregisteredType { .. }))
        ));
        assert_eq!(c.store().writes(), 0);
        assert_eq!(c.cache().stats().await.unwrap().item_count, 0);
    }

    #[tokio::test]
    async fn test_failed_store_write_leaves_cache_untouched() {
        let c = setup();
        c.save(record("Hot", "a")).await.unwrap();
        c.store().set_fail_writes(true);

        let updated = EntityRecord::new(EntityKey::new("Hot", "a"), json!({"id": "a", "n": 2}));
        let result = c.save(updated).await;

        assert!(matches!(
            result,
            Err(StashError::Store(StoreError::WriteFailed { .. }))
        ));
        assert_eq!(
            c.cache().get("Hot:n:a").await.unwrap(),
            Some(record("Hot", "a"))
        );
    }

    #[tokio::test]
    async fn test_failed_cache_write_still_saves() {
        let c = setup();
        c.cache().set_fail_writes(true);

        let saved = c.save(record("Hot", "a")).await.unwrap();

        assert!(matches!(
            saved.warning,
            Some(CacheWarning::WriteFailed { ref key, .. }) if key == "Hot:n:a"
        ));
        assert_eq!(c.store().len(), 1);
        assert_eq!(c.stats().cache_warnings, 1);
    }

    #[tokio::test]
    async fn test_identity_field_filled_from_key() {
        let c = setup();
        let bare = EntityRecord::new(EntityKey::new("Hot", 9), json!({"n": 1}));
        c.save(bare).await.unwrap();

        let loaded = c.load("Hot", 9).await.unwrap().unwrap();
        assert_eq!(loaded.payload, json!({"n": 1, "id": 9}));
    }

    #[tokio::test]
    async fn test_identity_mismatch_rejected() {
        let c = setup();
        let bad = EntityRecord::new(EntityKey::new("Hot", "a"), json!({"id": "b"}));

        assert!(matches!(
            c.save(bad).await,
            Err(StashError::Record(RecordError::IdentityMismatch { .. }))
        ));
        assert_eq!(c.store().writes(), 0);
    }

    #[tokio::test]
    async fn test_load_hit_skips_store() {
        let c = setup();
        c.save(record("Hot", "a")).await.unwrap();

        let loaded = c.load("Hot", "a").await.unwrap();

        assert_eq!(loaded, Some(record("Hot", "a")));
        assert_eq!(c.store().reads(), 0);
        assert_eq!(c.stats().cache_served, 1);
    }

    #[tokio::test]
    async fn test_load_miss_fills_cache() {
        let c = setup();
        c.save(record("Hot", "a")).await.unwrap();
        c.cache().clear_all().await.unwrap();

        assert!(c.load("Hot", "a").await.unwrap().is_some());
        assert_eq!(c.store().reads(), 1);
        assert_eq!(c.cache().stats().await.unwrap().item_count, 1);

        assert!(c.load("Hot", "a").await.unwrap().is_some());
        assert_eq!(c.store().reads(), 1);
    }

    #[tokio::test]
    async fn test_load_miss_without_fill() {
        let registry = Arc::new(EntityRegistry::new());
        registry.register(TypeDescriptor::new("Hot").cached()).unwrap();
        let c = CacheAsideCoordinator::new(
            registry,
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryStore::new()),
            CoordinatorConfig::new().with_fill_on_read(false),
        )
        .unwrap();
        c.store()
            .put(&EntityKey::new("Hot", "a"), &record("Hot", "a"))
            .await
            .unwrap();

        assert!(c.load("Hot", "a").await.unwrap().is_some());
        assert_eq!(c.cache().stats().await.unwrap().item_count, 0);
    }

    #[tokio::test]
    async fn test_load_uncached_never_touches_cache() {
        let c = setup();
        c.save(record("Cold", "a")).await.unwrap();

        assert!(c.load("Cold", "a").await.unwrap().is_some());
        assert!(c.load("Cold", "a").await.unwrap().is_some());

        let stats = c.cache().stats().await.unwrap();
        assert_eq!((stats.hits, stats.misses, stats.item_count), (0, 0, 0));
        assert_eq!(c.store().reads(), 2);
    }

    #[tokio::test]
    async fn test_load_missing_entity_is_none() {
        let c = setup();
        assert_eq!(c.load("Hot", "nobody").await.unwrap(), None);
        assert_eq!(c.load("Cold", "nobody").await.unwrap(), None);
        assert_eq!(c.cache().stats().await.unwrap().item_count, 0);
    }

    #[tokio::test]
    async fn test_load_store_failure_is_fatal() {
        let c = setup();
        c.store().set_fail_reads(true);
        assert!(matches!(
            c.load("Cold", "a").await,
            Err(StashError::Store(StoreError::ReadFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_load_cache_read_failure_falls_back_to_store() {
        let c = setup();
        c.save(record("Hot", "a")).await.unwrap();
        c.cache().set_fail_reads(true);

        assert_eq!(c.load("Hot", "a").await.unwrap(), Some(record("Hot", "a")));
        assert_eq!(c.store().reads(), 1);
        assert_eq!(c.stats().cache_warnings, 1);
    }

    #[tokio::test]
    async fn test_load_unregistered_kind() {
        let c = setup();
        assert!(matches!(
            c.load("Ghost", "a").await,
            Err(StashError::Registry(RegistryError::UnregisteredType { .. }))
        ));
    }

    #[tokio::test]
    async fn test_typed_save_allocates_id() {
        let c = setup();
        let saved = c
            .save_entity(&Ticket {
                id: None,
                title: "first".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(saved.key, EntityKey::new("Ticket", 1));

        let loaded: Ticket = c.load_entity::<Ticket>(1).await.unwrap().unwrap();
        assert_eq!(
            loaded,
            Ticket {
                id: Some(1),
                title: "first".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_typed_save_keeps_explicit_id() {
        let c = setup();
        let saved = c
            .save_entity(&Ticket {
                id: Some(40),
                title: "x".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(saved.key, EntityKey::new("Ticket", 40));
    }

    #[tokio::test]
    async fn test_delete_removes_store_and_cache() {
        let c = setup();
        c.save(record("Hot", "a")).await.unwrap();

        let deleted = c.delete("Hot", "a").await.unwrap();

        assert!(deleted.existed);
        assert!(deleted.warning.is_none());
        assert!(c.store().is_empty());
        assert_eq!(c.cache().stats().await.unwrap().item_count, 0);
        assert_eq!(c.load("Hot", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_store_failure_keeps_cache() {
        let c = setup();
        c.save(record("Hot", "a")).await.unwrap();
        c.store().set_fail_writes(true);

        assert!(c.delete("Hot", "a").await.is_err());
        assert_eq!(c.cache().stats().await.unwrap().item_count, 1);
    }

    #[tokio::test]
    async fn test_evict_only_touches_cache() {
        let c = setup();
        c.save(record("Hot", "a")).await.unwrap();

        assert!(c.evict("Hot", "a").await.unwrap());
        assert_eq!(c.store().len(), 1);

        c.cache().set_fail_writes(true);
        assert!(matches!(
            c.evict("Hot", "a").await,
            Err(StashError::Cache(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_helpers() {
        let c = setup();
        let saved = c
            .save_all(vec![record("Hot", "a"), record("Cold", "b")])
            .await
            .unwrap();
        assert_eq!(saved.len(), 2);

        let loaded = c.load_all("Hot", ["a", "missing"]).await.unwrap();
        assert!(loaded[0].is_some());
        assert!(loaded[1].is_none());

        assert!(c
            .save_all(vec![record("Hot", "c"), record("Ghost", "d"), record("Hot", "e")])
            .await
            .is_err());
        assert!(c.load("Hot", "c").await.unwrap().is_some());
        assert!(c.load("Hot", "e").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_per_kind_expiration_used() {
        let registry = Arc::new(EntityRegistry::new());
        registry
            .register(TypeDescriptor::new("Brief").cached_for(Duration::from_millis(1)))
            .unwrap();
        let c = CacheAsideCoordinator::with_defaults(
            registry,
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryStore::new()),
        );
        c.save(record("Brief", "a")).await.unwrap();
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(c.cache().stats().await.unwrap().item_count, 0);
        assert!(c.load("Brief", "a").await.unwrap().is_some());
        assert_eq!(c.store().reads(), 1);
    }

    #[tokio::test]
    async fn test_uncached_save_reports_failed_invalidation() {
        let c = setup();
        c.cache().set_fail_writes(true);

        let saved = c.save(record("Cold", "a")).await.unwrap();

        assert!(matches!(
            saved.warning,
            Some(CacheWarning::InvalidateFailed { ref key, .. }) if key == "Cold:n:a"
        ));
        assert_eq!(c.store().len(), 1);
        assert_eq!(c.stats().cache_warnings, 1);
        assert_eq!(c.load("Cold", "a").await.unwrap(), Some(record("Cold", "a")));
    }

    #[tokio::test]
    async fn test_delete_reports_failed_invalidation() {
        let c = setup();
        c.save(record("Hot", "a")).await.unwrap();
        c.cache().set_fail_writes(true);

        let deleted = c.delete("Hot", "a").await.unwrap();

        assert!(deleted.existed);
        assert!(matches!(
            deleted.warning,
            Some(CacheWarning::InvalidateFailed { ref key, .. }) if key == "Hot:n:a"
        ));
        assert!(c.store().is_empty());
        assert_eq!(c.stats().cache_warnings, 1);
    }

    #[tokio::test]
    async fn test_typed_save_allocation_failure_has_no_effect() {
        let c = setup();
        c.store().set_fail_writes(true);

        let result = c
            .save_entity(&Ticket {
                id: None,
                title: "lost".to_string(),
            })
            .await;

        assert!(matches!(
            result,
            Err(StashError::Store(StoreError::AllocationFailed { ref kind, .. })) if kind == "Ticket"
        ));
        assert_eq!(c.store().writes(), 0);
        assert_eq!(c.cache().stats().await.unwrap().item_count, 0);
        assert_eq!(c.stats().saves, 0);
    }

    /// Store whose next `get` parks after reading until released.
    struct PausingStore {
        inner: InMemoryStore,
        armed: AtomicBool,
        reached: Notify,
        release: Notify,
    }

    impl PausingStore {
        fn new() -> Self {
            Self {
                inner: InMemoryStore::new(),
                armed: AtomicBool::new(false),
                reached: Notify::new(),
                release: Notify::new(),
            }
        }

        fn pause_next_read(&self) {
            self.armed.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl EntityStore for PausingStore {
        async fn put(&self, key: &EntityKey, record: &EntityRecord) -> StoreResult<()> {
            self.inner.put(key, record).await
        }

        async fn get(&self, key: &EntityKey) -> StoreResult<Option<EntityRecord>> {
            let found = self.inner.get(key).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.reached.notify_one();
                self.release.notified().await;
            }
            Ok(found)
        }

        async fn delete(&self, key: &EntityKey) -> StoreResult<bool> {
            self.inner.delete(key).await
        }

        async fn allocate_id(&self, kind: &str) -> StoreResult<i64> {
            self.inner.allocate_id(kind).await
        }
    }

    fn pausing_setup() -> CacheAsideCoordinator<InMemoryCache, PausingStore> {
        let registry = Arc::new(EntityRegistry::new());
        registry.register(TypeDescriptor::new("Hot").cached()).unwrap();
        CacheAsideCoordinator::with_defaults(
            registry,
            Arc::new(InMemoryCache::new()),
            Arc::new(PausingStore::new()),
        )
    }

    fn version(v: i64) -> EntityRecord {
        EntityRecord::new(EntityKey::new("Hot", "a"), json!({"id": "a", "v": v}))
    }

    #[tokio::test]
    async fn test_fill_never_replaces_concurrent_save() {
        let c = pausing_setup();
        c.save(version(1)).await.unwrap();
        c.cache().clear_all().await.unwrap();
        c.store().pause_next_read();

        let loader = {
            let c = c.clone();
            tokio::spawn(async move { c.load("Hot", "a").await })
        };
        c.store().reached.notified().await;
        c.save(version(2)).await.unwrap();
        c.store().release.notify_one();

        // The in-flight load still answers with what it read.
        assert_eq!(loader.await.unwrap().unwrap(), Some(version(1)));

        assert_eq!(c.cache().get("Hot:n:a").await.unwrap(), Some(version(2)));
        assert_eq!(c.load("Hot", "a").await.unwrap(), Some(version(2)));
    }

    #[tokio::test]
    async fn test_fill_after_concurrent_delete_is_dropped() {
        let c = pausing_setup();
        c.save(version(1)).await.unwrap();
        c.cache().clear_all().await.unwrap();
        c.store().pause_next_read();

        let loader = {
            let c = c.clone();
            tokio::spawn(async move { c.load("Hot", "a").await })
        };
        c.store().reached.notified().await;
        assert!(c.delete("Hot", "a").await.unwrap().existed);
        c.store().release.notify_one();

        assert_eq!(loader.await.unwrap().unwrap(), Some(version(1)));

        assert_eq!(c.cache().stats().await.unwrap().item_count, 0);
        assert_eq!(c.load("Hot", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fill_without_concurrent_write_is_kept() {
        let c = pausing_setup();
        c.save(version(1)).await.unwrap();
        c.cache().clear_all().await.unwrap();

        assert_eq!(c.load("Hot", "a").await.unwrap(), Some(version(1)));

        assert!(c.cache().contains("Hot:n:a").await.unwrap());
        assert_eq!(c.stats().cache_warnings, 0);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = CacheAsideCoordinator::new(
            Arc::new(EntityRegistry::new()),
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryStore::new()),
            CoordinatorConfig::new().with_default_expiration(Duration::ZERO),
        );
        assert!(matches!(result, Err(StashError::Config(_))));
    }
}
