//! Persistent store client layer.
//!
//! The store is authoritative. Every failure coming out of an
//! [`EntityStore`] aborts the coordinator operation that caused it.

pub mod memory;
pub mod traits;

pub use memory::InMemoryStore;
pub use traits::{EntityStore, StoreResult};
