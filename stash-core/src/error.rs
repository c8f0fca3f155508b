//! Error types for STASH operations

use thiserror::Error;

/// Entity metadata registry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Entity kind not registered: {kind}")]
    UnregisteredType { kind: String },

    #[error("Conflicting registration for {kind}: {reason}")]
    DuplicateRegistration { kind: String, reason: String },

    #[error("Invalid descriptor for {kind}: {reason}")]
    InvalidDescriptor { kind: String, reason: String },

    #[error("Registry lock poisoned")]
    LockPoisoned,
}

/// Persistent store errors.
///
/// Keys are carried in canonical string form so the error stays `Clone + Eq`
/// without borrowing from the request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store write failed for {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Store read failed for {key}: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("Store delete failed for {key}: {reason}")]
    DeleteFailed { key: String, reason: String },

    #[error("Id allocation failed for {kind}: {reason}")]
    AllocationFailed { kind: String, reason: String },
}

/// Cache client errors.
///
/// Save, load and delete downgrade these to a [`CacheWarning`]; only an
/// explicit eviction surfaces them to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Record shape errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Invalid identity in field {field}: {reason}")]
    InvalidIdentity { field: String, reason: String },

    #[error("Identity field {field} is {found} but the record key is {expected}")]
    IdentityMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Payload for {kind} must be a JSON object")]
    NotAnObject { kind: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Invalid canonical key {input}: {reason}")]
    InvalidKey { input: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all STASH errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StashError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<serde_json::Error> for StashError {
    fn from(e: serde_json::Error) -> Self {
        StashError::Record(RecordError::Serialization {
            reason: e.to_string(),
        })
    }
}

/// Result type alias for STASH operations.
pub type StashResult<T> = Result<T, StashError>;

/// Non-fatal cache problem raised while the store operation succeeded.
///
/// The cache may be cold after one of these, never wrong.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheWarning {
    #[error("Cache write failed for {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Cache invalidation failed for {key}: {reason}")]
    InvalidateFailed { key: String, reason: String },

    #[error("Cache read failed for {key}: {reason}")]
    ReadFailed { key: String, reason: String },
}

impl CacheWarning {
    /// Canonical cache key the warning refers to.
    pub fn key(&self) -> &str {
        match self {
            CacheWarning::WriteFailed { key, .. }
            | CacheWarning::InvalidateFailed { key, .. }
            | CacheWarning::ReadFailed { key, .. } => key,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
