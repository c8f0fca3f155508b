//! Configuration types
//!
//! Both config structs follow the same shape: sensible defaults, a
//! `from_env()` constructor, chainable `with_*` setters and `validate()`.

use crate::{ConfigError, StashResult};
use std::time::Duration;

/// Coordinator behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Populate the cache after a cache-miss load of a cached kind.
    pub fill_on_read: bool,
    /// Delete any cache entry for an uncached kind when it is saved.
    pub invalidate_uncached: bool,
    /// Expiration for cached kinds whose policy does not set one.
    pub default_expiration: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            fill_on_read: true,
            invalidate_uncached: true,
            default_expiration: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a CoordinatorConfig from environment variables.
    ///
    /// Environment variables:
    /// - `STASH_FILL_ON_READ`: "true" or "false" (default: true)
    /// - `STASH_INVALIDATE_UNCACHED`: "true" or "false" (default: true)
    /// - `STASH_DEFAULT_EXPIRATION_SECS`: seconds (default: unset)
    ///
    /// Flags accept true/false, 1/0, yes/no and on/off. Anything else, or a
    /// number that does not parse, is a `ConfigError::InvalidValue`.
    pub fn from_env() -> StashResult<Self> {
        Self::from_lookup(env_var)
    }

    /// Build from an arbitrary variable source, as [`Self::from_env`] does.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StashResult<Self> {
        let config = Self {
            fill_on_read: parse_flag(&lookup, "STASH_FILL_ON_READ")?.unwrap_or(true),
            invalidate_uncached: parse_flag(&lookup, "STASH_INVALIDATE_UNCACHED")?
                .unwrap_or(true),
            default_expiration: parse_u64(&lookup, "STASH_DEFAULT_EXPIRATION_SECS")?
                .map(Duration::from_secs),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_fill_on_read(mut self, enabled: bool) -> Self {
        self.fill_on_read = enabled;
        self
    }

    pub fn with_invalidate_uncached(mut self, enabled: bool) -> Self {
        self.invalidate_uncached = enabled;
        self
    }

    pub fn with_default_expiration(mut self, expiration: Duration) -> Self {
        self.default_expiration = Some(expiration);
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - default_expiration, if set, is positive
    pub fn validate(&self) -> StashResult<()> {
        if let Some(expiration) = self.default_expiration {
            if expiration.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: "default_expiration".to_string(),
                    value: format!("{:?}", expiration),
                    reason: "default_expiration must be positive".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Sizing and expiry for the in-memory cache.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryCacheConfig {
    /// Maximum live entries; the oldest entry is evicted beyond this.
    pub max_entries: Option<usize>,
    /// TTL applied when `set` is called without an expiration.
    pub default_ttl: Option<Duration>,
}

impl MemoryCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a MemoryCacheConfig from environment variables.
    ///
    /// Environment variables:
    /// - `STASH_CACHE_MAX_ENTRIES`: entry cap (default: unbounded)
    /// - `STASH_CACHE_TTL_SECS`: default TTL in seconds (default: none)
    pub fn from_env() -> StashResult<Self> {
        Self::from_lookup(env_var)
    }

    /// Build from an arbitrary variable source, as [`Self::from_env`] does.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StashResult<Self> {
        let max_entries = match parse_u64(&lookup, "STASH_CACHE_MAX_ENTRIES")? {
            Some(n) => Some(usize::try_from(n).map_err(|_| ConfigError::InvalidValue {
                field: "STASH_CACHE_MAX_ENTRIES".to_string(),
                value: n.to_string(),
                reason: "does not fit in usize".to_string(),
            })?),
            None => None,
        };
        let config = Self {
            max_entries,
            default_ttl: parse_u64(&lookup, "STASH_CACHE_TTL_SECS")?.map(Duration::from_secs),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - max_entries, if set, is at least 1
    /// - default_ttl, if set, is positive
    pub fn validate(&self) -> StashResult<()> {
        if self.max_entries == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "max_entries".to_string(),
                value: "0".to_string(),
                reason: "max_entries must be at least 1".to_string(),
            }
            .into());
        }

        if let Some(ttl) = self.default_ttl {
            if ttl.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: "default_ttl".to_string(),
                    value: format!("{:?}", ttl),
                    reason: "default_ttl must be positive".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_flag(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            field: name.to_string(),
            value: raw,
            reason: "expected true/false, 1/0, yes/no or on/off".to_string(),
        }),
    }
}

fn parse_u64(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let parsed = raw.trim().parse::<u64>();
    parsed.map(Some).map_err(|_| ConfigError::InvalidValue {
        field: name.to_string(),
        value: raw,
        reason: "expected a non-negative integer".to_string(),
    })
}
