//! Identity types: identity values, entity keys and their canonical form.

use crate::{RecordError, StashResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between the parts of a canonical key.
const SEPARATOR: char = ':';

/// Tag used for string identities in the canonical form.
const NAME_TAG: &str = "n";

/// Tag used for numeric identities in the canonical form.
const ID_TAG: &str = "i";

/// Identity of one entity within its kind.
///
/// Either a caller-chosen name or a numeric id. Store-allocated identities
/// are always numeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdentityValue {
    /// Numeric id
    Id(i64),
    /// String name
    Name(String),
}

impl IdentityValue {
    /// Convert to the JSON value stored in the identity field.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            IdentityValue::Id(id) => serde_json::Value::from(*id),
            IdentityValue::Name(name) => serde_json::Value::from(name.as_str()),
        }
    }
}

impl fmt::Display for IdentityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityValue::Id(id) => write!(f, "{}", id),
            IdentityValue::Name(name) => f.write_str(name),
        }
    }
}

impl From<i64> for IdentityValue {
    fn from(id: i64) -> Self {
        IdentityValue::Id(id)
    }
}

impl From<i32> for IdentityValue {
    fn from(id: i32) -> Self {
        IdentityValue::Id(i64::from(id))
    }
}

impl From<&str> for IdentityValue {
    fn from(name: &str) -> Self {
        IdentityValue::Name(name.to_string())
    }
}

impl From<String> for IdentityValue {
    fn from(name: String) -> Self {
        IdentityValue::Name(name)
    }
}

/// Check that a kind name is usable inside a canonical key.
///
/// Kinds are non-empty and limited to ASCII alphanumerics, `_`, `-` and `.`,
/// so the first separator in a canonical key always ends the kind.
pub fn validate_kind(kind: &str) -> Result<(), String> {
    if kind.is_empty() {
        return Err("kind must not be empty".to_string());
    }
    if let Some(bad) = kind
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(format!("kind contains unsupported character {:?}", bad));
    }
    Ok(())
}

/// Key addressing exactly one entity: its kind plus its identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    kind: String,
    id: IdentityValue,
}

impl EntityKey {
    /// Create a key for an entity of `kind` with the given identity.
    pub fn new(kind: impl Into<String>, id: impl Into<IdentityValue>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Kind this key belongs to.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Identity within the kind.
    pub fn id(&self) -> &IdentityValue {
        &self.id
    }

    /// Canonical string form used as the cache key.
    ///
    /// Format: `<kind>:n:<name>` or `<kind>:i:<id>`. The kind is embedded so
    /// two kinds sharing an identity never share a cache entry, and the tag
    /// keeps `Name("7")` apart from `Id(7)`.
    pub fn canonical(&self) -> String {
        match &self.id {
            IdentityValue::Id(id) => format!("{}{SEPARATOR}{ID_TAG}{SEPARATOR}{}", self.kind, id),
            IdentityValue::Name(name) => {
                format!("{}{SEPARATOR}{NAME_TAG}{SEPARATOR}{}", self.kind, name)
            }
        }
    }

    /// Parse a canonical key produced by [`EntityKey::canonical`].
    pub fn parse(input: &str) -> StashResult<Self> {
        let invalid = |reason: &str| RecordError::InvalidKey {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = input.splitn(3, SEPARATOR);
        let kind = parts.next().unwrap_or_default();
        let tag = parts.next().ok_or_else(|| invalid("missing identity tag"))?;
        let rest = parts.next().ok_or_else(|| invalid("missing identity"))?;

        validate_kind(kind).map_err(|reason| invalid(&reason))?;

        let id = match tag {
            ID_TAG => IdentityValue::Id(
                rest.parse::<i64>()
                    .map_err(|_| invalid("numeric identity is not an integer"))?,
            ),
            NAME_TAG => IdentityValue::Name(rest.to_string()),
            _ => return Err(invalid("unknown identity tag").into()),
        };

        Ok(Self::new(kind, id))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}
