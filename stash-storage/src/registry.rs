//! Entity metadata registry.
//!
//! Holds one [`TypeDescriptor`] per kind. Written during start-up, read on
//! every coordinator call afterwards.

use std::collections::HashMap;
use std::sync::RwLock;

use stash_core::{Entity, IdentityValue, RegistryError, StashResult, TypeDescriptor};

/// Per-kind cache eligibility and identity field.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    descriptors: RwLock<HashMap<String, TypeDescriptor>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind.
    ///
    /// Re-registering an identical descriptor is a no-op. Re-registering with
    /// a different eligibility, expiration or identity field fails.
    pub fn register(&self, descriptor: TypeDescriptor) -> Result<(), RegistryError> {
        descriptor.validate()?;

        let mut descriptors = self
            .descriptors
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?;

        if let Some(existing) = descriptors.get(descriptor.kind()) {
            if existing == &descriptor {
                return Ok(());
            }
            return Err(RegistryError::DuplicateRegistration {
                kind: descriptor.kind().to_string(),
                reason: conflict_reason(existing, &descriptor),
            });
        }

        tracing::debug!(
            kind = descriptor.kind(),
            cacheable = descriptor.is_cacheable(),
            identity_field = descriptor.identity_field_name(),
            "registered entity kind"
        );
        descriptors.insert(descriptor.kind().to_string(), descriptor);
        Ok(())
    }

    /// Register a typed entity using its own descriptor.
    pub fn register_entity<T: Entity>(&self) -> Result<(), RegistryError> {
        self.register(T::descriptor())
    }

    /// Look up the descriptor for `kind`.
    pub fn descriptor(&self, kind: &str) -> Result<TypeDescriptor, RegistryError> {
        let descriptors = self
            .descriptors
            .read()
            .map_err(|_| RegistryError::LockPoisoned)?;
        descriptors
            .get(kind)
            .cloned()
            .ok_or_else(|| RegistryError::UnregisteredType {
                kind: kind.to_string(),
            })
    }

    /// Whether `kind` participates in caching.
    pub fn is_cacheable(&self, kind: &str) -> Result<bool, RegistryError> {
        self.descriptor(kind).map(|d| d.is_cacheable())
    }

    /// Read the identity of a payload of `kind` through its identity field.
    pub fn identity_of(
        &self,
        kind: &str,
        payload: &serde_json::Value,
    ) -> StashResult<Option<IdentityValue>> {
        self.descriptor(kind)?.identity_of(payload)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .descriptors
            .read()
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default();
        kinds.sort();
        kinds
    }
}

fn conflict_reason(existing: &TypeDescriptor, incoming: &TypeDescriptor) -> String {
    if existing.is_cacheable() != incoming.is_cacheable() {
        format!(
            "cache eligibility {} conflicts with registered {}",
            incoming.is_cacheable(),
            existing.is_cacheable()
        )
    } else if existing.identity_field_name() != incoming.identity_field_name() {
        format!(
            "identity field {:?} conflicts with registered {:?}",
            incoming.identity_field_name(),
            existing.identity_field_name()
        )
    } else {
        format!(
            "cache policy {:?} conflicts with registered {:?}",
            incoming.policy(),
            existing.policy()
        )
    }
}
