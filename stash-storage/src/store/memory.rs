//! In-memory entity store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use stash_core::{EntityKey, EntityRecord, IdentityValue, StoreError};

use super::traits::{EntityStore, StoreResult};

/// In-memory [`EntityStore`] for testing and single-process use.
///
/// Tracks how many reads and writes reached it so callers can assert which
/// path served a load, and can be told to fail reads or writes.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<EntityKey, EntityRecord>>,
    /// Highest id handed out or written, per kind.
    id_high_water: RwLock<HashMap<String, i64>>,
    reads: AtomicU64,
    writes: AtomicU64,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls that reached the store.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of successful `put` calls.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make `put`, `delete` and `allocate_id` fail until switched off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `get` fail until switched off.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn bump_high_water(&self, kind: &str, id: i64) -> Result<(), String> {
        let mut high = self
            .id_high_water
            .write()
            .map_err(|_| "id allocator lock poisoned".to_string())?;
        let current = high.entry(kind.to_string()).or_insert(0);
        if id > *current {
            *current = id;
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn put(&self, key: &EntityKey, record: &EntityRecord) -> StoreResult<()> {
        let failed = |reason: &str| StoreError::WriteFailed {
            key: key.canonical(),
            reason: reason.to_string(),
        };

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(failed("writes disabled"));
        }

        if let IdentityValue::Id(id) = key.id() {
            self.bump_high_water(key.kind(), *id)
                .map_err(|reason| failed(&reason))?;
        }

        let mut records = self
            .records
            .write()
            .map_err(|_| failed("store lock poisoned"))?;
        records.insert(key.clone(), record.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get(&self, key: &EntityKey) -> StoreResult<Option<EntityRecord>> {
        let failed = |reason: &str| StoreError::ReadFailed {
            key: key.canonical(),
            reason: reason.to_string(),
        };

        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(failed("reads disabled"));
        }

        self.reads.fetch_add(1, Ordering::Relaxed);
        let records = self
            .records
            .read()
            .map_err(|_| failed("store lock poisoned"))?;
        Ok(records.get(key).cloned())
    }

    async fn delete(&self, key: &EntityKey) -> StoreResult<bool> {
        let failed = |reason: &str| StoreError::DeleteFailed {
            key: key.canonical(),
            reason: reason.to_string(),
        };

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(failed("writes disabled"));
        }

        let mut records = self
            .records
            .write()
            .map_err(|_| failed("store lock poisoned"))?;
        Ok(records.remove(key).is_some())
    }

    async fn allocate_id(&self, kind: &str) -> StoreResult<i64> {
        let failed = |reason: &str| StoreError::AllocationFailed {
            kind: kind.to_string(),
            reason: reason.to_string(),
        };

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(failed("writes disabled"));
        }

        let mut high = self
            .id_high_water
            .write()
            .map_err(|_| failed("id allocator lock poisoned"))?;
        let current = high.entry(kind.to_string()).or_insert(0);
        *current = current
            .checked_add(1)
            .ok_or_else(|| failed("id space exhausted"))?;
        Ok(*current)
    }
}
