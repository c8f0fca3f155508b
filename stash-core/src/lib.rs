//! STASH Core - Entity Types
//!
//! Pure data structures shared by the storage and test crates: identities,
//! keys, records, per-kind descriptors, the error taxonomy and configuration.
//! No I/O lives here.

pub mod config;
pub mod entity;
pub mod error;
pub mod identity;

pub use config::{CoordinatorConfig, MemoryCacheConfig};
pub use entity::{CachePolicy, Entity, EntityRecord, TypeDescriptor, DEFAULT_IDENTITY_FIELD};
pub use error::{
    CacheError, CacheWarning, ConfigError, RecordError, RegistryError, StashError, StashResult,
    StoreError,
};
pub use identity::{validate_kind, EntityKey, IdentityValue};
