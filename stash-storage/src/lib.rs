//! STASH Storage - Cache-Aside Coordination
//!
//! Client traits for the persistent store and the cache, in-memory
//! implementations of both, the entity metadata registry, and the
//! coordinator that keeps the cache consistent with the store.

pub mod cache;
pub mod coordinator;
pub mod registry;
pub mod store;

pub use cache::{CacheClient, CacheResult, CacheStats, InMemoryCache};
pub use coordinator::{CacheAsideCoordinator, CoordinatorStats, Deleted, Saved};
pub use registry::EntityRegistry;
pub use store::{EntityStore, InMemoryStore, StoreResult};

// Re-export core types so most callers need a single dependency.
pub use stash_core::{
    CachePolicy, CacheWarning, CoordinatorConfig, Entity, EntityKey, EntityRecord,
    IdentityValue, MemoryCacheConfig, StashError, StashResult, TypeDescriptor,
};
