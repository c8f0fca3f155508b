//! Entity records, per-type descriptors and the typed entity trait.

use crate::identity::validate_kind;
use crate::{EntityKey, IdentityValue, RecordError, RegistryError, StashResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

/// Identity field used when a descriptor does not name one.
pub const DEFAULT_IDENTITY_FIELD: &str = "id";

/// Whether instances of a kind take part in caching.
///
/// Fixed per kind at registration; it never varies per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CachePolicy {
    /// Never cached; saves actively invalidate any stray entry
    #[default]
    Uncached,
    /// Cached, optionally with a per-kind entry expiration
    Cached { expiration: Option<Duration> },
}

impl CachePolicy {
    /// Whether this policy makes the kind cache-eligible.
    pub fn is_cached(&self) -> bool {
        matches!(self, CachePolicy::Cached { .. })
    }

    /// Per-kind expiration, if one was configured.
    pub fn expiration(&self) -> Option<Duration> {
        match self {
            CachePolicy::Cached { expiration } => *expiration,
            CachePolicy::Uncached => None,
        }
    }
}

/// Registration record for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    kind: String,
    identity_field: String,
    cache_policy: CachePolicy,
}

impl TypeDescriptor {
    /// Create an uncached descriptor using the default identity field.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            identity_field: DEFAULT_IDENTITY_FIELD.to_string(),
            cache_policy: CachePolicy::Uncached,
        }
    }

    /// Set the payload field holding the entity's identity.
    pub fn identity_field(mut self, field: impl Into<String>) -> Self {
        self.identity_field = field.into();
        self
    }

    /// Mark the kind cache-eligible with no per-kind expiration.
    pub fn cached(self) -> Self {
        self.cache_policy(CachePolicy::Cached { expiration: None })
    }

    /// Mark the kind cache-eligible with entries expiring after `expiration`.
    pub fn cached_for(self, expiration: Duration) -> Self {
        self.cache_policy(CachePolicy::Cached {
            expiration: Some(expiration),
        })
    }

    /// Set the cache policy explicitly.
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn identity_field_name(&self) -> &str {
        &self.identity_field
    }

    pub fn policy(&self) -> CachePolicy {
        self.cache_policy
    }

    pub fn is_cacheable(&self) -> bool {
        self.cache_policy.is_cached()
    }

    /// Validate the descriptor.
    ///
    /// Validates:
    /// - the kind is usable inside a canonical key
    /// - the identity field is not empty
    /// - a per-kind expiration, if set, is positive
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidDescriptor {
            kind: self.kind.clone(),
            reason,
        };

        validate_kind(&self.kind).map_err(invalid)?;

        if self.identity_field.is_empty() {
            return Err(invalid("identity field must not be empty".to_string()));
        }

        if let Some(expiration) = self.cache_policy.expiration() {
            if expiration.is_zero() {
                return Err(invalid("cache expiration must be positive".to_string()));
            }
        }

        Ok(())
    }

    /// Read the identity from a payload using this descriptor's field.
    ///
    /// Strings map to names, integers to ids, a missing or null field to
    /// `None`. Anything else is rejected.
    pub fn identity_of(&self, payload: &serde_json::Value) -> StashResult<Option<IdentityValue>> {
        let object = payload.as_object().ok_or_else(|| RecordError::NotAnObject {
            kind: self.kind.clone(),
        })?;

        match object.get(&self.identity_field) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(name)) => Ok(Some(IdentityValue::Name(name.clone()))),
            Some(serde_json::Value::Number(number)) => number
                .as_i64()
                .map(|id| Some(IdentityValue::Id(id)))
                .ok_or_else(|| {
                    RecordError::InvalidIdentity {
                        field: self.identity_field.clone(),
                        reason: format!("{} is not a 64-bit integer", number),
                    }
                    .into()
                }),
            Some(other) => Err(RecordError::InvalidIdentity {
                field: self.identity_field.clone(),
                reason: format!("unsupported identity value {}", other),
            }
            .into()),
        }
    }

    /// Write `id` into the identity field of `payload`.
    pub fn set_identity(
        &self,
        payload: &mut serde_json::Value,
        id: &IdentityValue,
    ) -> StashResult<()> {
        let object = payload
            .as_object_mut()
            .ok_or_else(|| RecordError::NotAnObject {
                kind: self.kind.clone(),
            })?;
        object.insert(self.identity_field.clone(), id.to_json());
        Ok(())
    }
}

/// A persisted (or about to be persisted) entity: its key plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub key: EntityKey,
    pub payload: serde_json::Value,
}

impl EntityRecord {
    pub fn new(key: EntityKey, payload: serde_json::Value) -> Self {
        Self { key, payload }
    }

    pub fn kind(&self) -> &str {
        self.key.kind()
    }

    /// Deserialize the payload into a typed entity.
    pub fn decode<T: DeserializeOwned>(&self) -> StashResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Typed entity that knows its own registration record.
///
/// The descriptor must be the same for every call; eligibility is a property
/// of the type, not of the instance.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Registration record for this type.
    fn descriptor() -> TypeDescriptor;
}
