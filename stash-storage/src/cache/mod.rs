//! Cache client layer.
//!
//! The coordinator only ever sees the [`CacheClient`] trait. The cache is an
//! optimization, never the source of truth: the coordinator downgrades every
//! [`stash_core::CacheError`] coming out of a client into a warning.
//!
//! [`InMemoryCache`] is the bundled implementation, used by tests and by
//! single-process embeddings.

pub mod memory;
pub mod traits;

pub use memory::InMemoryCache;
pub use traits::{CacheClient, CacheResult, CacheStats};
