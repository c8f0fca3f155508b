//! STASH Test Utilities
//!
//! Centralized test infrastructure for the STASH workspace:
//! - A harness that wires registry, cache, store and coordinator together
//! - Fixture entities for the cached / uncached scenarios
//! - Proptest generators for keys and records
//! - Custom assertions for STASH-specific validation

pub use stash_core::{
    CachePolicy, CacheWarning, CoordinatorConfig, Entity, EntityKey, EntityRecord,
    IdentityValue, MemoryCacheConfig, RecordError, RegistryError, StashError, StashResult,
    StoreError, TypeDescriptor,
};
pub use stash_storage::{
    CacheAsideCoordinator, CacheClient, CacheStats, CoordinatorStats, EntityRegistry,
    EntityStore, InMemoryCache, InMemoryStore, Saved,
};

use std::sync::Arc;

/// Coordinator over the bundled in-memory clients.
pub type MemoryCoordinator = CacheAsideCoordinator<InMemoryCache, InMemoryStore>;

/// Install a fmt subscriber for tests, honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// HARNESS
// ============================================================================

/// Registry, in-memory cache, in-memory store and coordinator, wired together
/// with both fixture kinds registered.
pub struct TestHarness {
    coordinator: MemoryCoordinator,
}

impl TestHarness {
    /// Build a harness with default configuration.
    pub fn new() -> StashResult<Self> {
        Self::with_config(CoordinatorConfig::default(), MemoryCacheConfig::default())
    }

    /// Build a harness with explicit coordinator and cache configuration.
    pub fn with_config(
        config: CoordinatorConfig,
        cache_config: MemoryCacheConfig,
    ) -> StashResult<Self> {
        init_test_tracing();

        let registry = Arc::new(EntityRegistry::new());
        registry.register_entity::<fixtures::CacheableEntity>()?;
        registry.register_entity::<fixtures::NonCacheableEntity>()?;

        let coordinator = CacheAsideCoordinator::new(
            registry,
            Arc::new(InMemoryCache::with_config(cache_config)?),
            Arc::new(InMemoryStore::new()),
            config,
        )?;

        Ok(Self { coordinator })
    }

    pub fn coordinator(&self) -> &MemoryCoordinator {
        &self.coordinator
    }

    pub fn registry(&self) -> &EntityRegistry {
        self.coordinator.registry()
    }

    pub fn cache(&self) -> &InMemoryCache {
        self.coordinator.cache()
    }

    pub fn store(&self) -> &InMemoryStore {
        self.coordinator.store()
    }

    /// Drop every cache entry, as a per-test reset.
    pub async fn clear_cache(&self) -> StashResult<()> {
        Ok(self.cache().clear_all().await?)
    }

    pub async fn cache_stats(&self) -> StashResult<CacheStats> {
        Ok(self.cache().stats().await?)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built entities for common testing scenarios.

    use super::*;
    use serde::{Deserialize, Serialize};

    /// Entity kind with caching enabled.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CacheableEntity {
        pub id: String,
        pub name: String,
        pub age: i32,
    }

    impl CacheableEntity {
        pub fn new(id: impl Into<String>, name: impl Into<String>, age: i32) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
                age,
            }
        }

        pub fn key(&self) -> EntityKey {
            EntityKey::new(Self::descriptor().kind(), self.id.as_str())
        }
    }

    impl Entity for CacheableEntity {
        fn descriptor() -> TypeDescriptor {
            TypeDescriptor::new("CacheableEntity").cached()
        }
    }

    /// Entity kind with caching disabled.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct NonCacheableEntity {
        pub id: String,
        pub name: String,
        pub age: i32,
    }

    impl NonCacheableEntity {
        pub fn new(id: impl Into<String>, name: impl Into<String>, age: i32) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
                age,
            }
        }

        pub fn key(&self) -> EntityKey {
            EntityKey::new(Self::descriptor().kind(), self.id.as_str())
        }
    }

    impl Entity for NonCacheableEntity {
        fn descriptor() -> TypeDescriptor {
            TypeDescriptor::new("NonCacheableEntity")
        }
    }

    /// Entity whose id is allocated by the store on first save.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GeneratedIdEntity {
        pub id: Option<i64>,
        pub label: String,
    }

    impl Entity for GeneratedIdEntity {
        fn descriptor() -> TypeDescriptor {
            TypeDescriptor::new("GeneratedIdEntity").cached()
        }
    }

    /// Raw record with the given kind and name identity.
    pub fn record(kind: &str, id: &str, body: serde_json::Value) -> EntityRecord {
        let mut payload = serde_json::json!({ "id": id });
        if let (Some(target), serde_json::Value::Object(extra)) = (payload.as_object_mut(), body) {
            target.extend(extra);
        }
        EntityRecord::new(EntityKey::new(kind, id), payload)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest generators for keys, identities and records.

    use super::*;
    use proptest::prelude::*;

    /// Kinds that pass registration.
    pub fn arb_kind() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9_.-]{0,15}"
    }

    /// Name or numeric identities.
    pub fn arb_identity() -> impl Strategy<Value = IdentityValue> {
        prop_oneof![
            any::<i64>().prop_map(IdentityValue::Id),
            "[a-z0-9:_-]{1,20}".prop_map(IdentityValue::Name),
        ]
    }

    pub fn arb_key() -> impl Strategy<Value = EntityKey> {
        (arb_kind(), arb_identity()).prop_map(|(kind, id)| EntityKey::new(kind, id))
    }

    /// Flat JSON object payloads without an `id` field.
    pub fn arb_payload() -> impl Strategy<Value = serde_json::Value> {
        proptest::collection::btree_map("[a-hj-z][a-z]{0,7}", any::<i32>(), 0..6).prop_map(
            |fields| {
                serde_json::Value::Object(
                    fields
                        .into_iter()
                        .map(|(k, v)| (k, serde_json::Value::from(v)))
                        .collect(),
                )
            },
        )
    }

    /// Records of `kind` with name identities drawn from a small pool, so
    /// sequences of them revisit the same keys.
    pub fn arb_record_of(kind: &'static str) -> impl Strategy<Value = EntityRecord> {
        (0u8..8, arb_payload()).prop_map(move |(n, payload)| {
            EntityRecord::new(EntityKey::new(kind, format!("e{}", n)), payload)
        })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for STASH-specific validation.

    use super::*;

    /// Assert that a StashResult is an UnregisteredType registry error.
    #[track_caller]
    pub fn assert_unregistered<T: std::fmt::Debug>(result: &StashResult<T>) {
        match result {
            Err(StashError::Registry(RegistryError::UnregisteredType { .. })) => {}
            other => panic!("Expected UnregisteredType error, got: {:?}", other),
        }
    }

    /// Assert that a StashResult is a store write failure.
    #[track_caller]
    pub fn assert_store_write_failed<T: std::fmt::Debug>(result: &StashResult<T>) {
        match result {
            Err(StashError::Store(StoreError::WriteFailed { .. })) => {}
            other => panic!("Expected StoreError::WriteFailed, got: {:?}", other),
        }
    }

    /// Assert that a StashResult is a store read failure.
    #[track_caller]
    pub fn assert_store_read_failed<T: std::fmt::Debug>(result: &StashResult<T>) {
        match result {
            Err(StashError::Store(StoreError::ReadFailed { .. })) => {}
            other => panic!("Expected StoreError::ReadFailed, got: {:?}", other),
        }
    }

    /// Assert hit and miss counters.
    #[track_caller]
    pub fn assert_lookups(stats: &CacheStats, hits: u64, misses: u64) {
        assert_eq!(stats.hits, hits, "Wrong hit count in {:?}", stats);
        assert_eq!(stats.misses, misses, "Wrong miss count in {:?}", stats);
    }
}
