//! Strongly-typed identifiers for Bulwark entities.
//!
//! Constraint, unit, and consumer identifiers are all opaque strings chosen by
//! the caller, but they are distinct types so they cannot be mixed up:
//!
//! - **ConstraintId** names a capacity + strategy definition
//! - **ConstraintUnit** names the scope a constraint's capacity is counted in
//! - **ConsumerId** names one admission request within a unit
//!
//! # Example
//!
//! ```rust
//! use bulwark_core::id::{ConstraintId, ConstraintUnit};
//!
//! let constraint = ConstraintId::new("deploy-slots").unwrap();
//! let unit = ConstraintUnit::new("staging").unwrap();
//!
//! // IDs are different types - this won't compile:
//! // let wrong: ConstraintId = unit;
//! # let _ = (constraint, unit);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// Maximum length (in bytes) accepted for any identifier.
pub const MAX_ID_LEN: usize = 256;

/// Validates an opaque identifier string.
///
/// Identifiers must be non-empty, at most [`MAX_ID_LEN`] bytes, and free of
/// control characters.
fn validate(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidId {
            message: format!("{kind} cannot be empty"),
        });
    }

    if id.len() > MAX_ID_LEN {
        return Err(Error::InvalidId {
            message: format!("{kind} is too long (maximum {MAX_ID_LEN} bytes)"),
        });
    }

    if id.chars().any(char::is_control) {
        return Err(Error::InvalidId {
            message: format!("{kind} '{}' contains control characters", id.escape_debug()),
        });
    }

    Ok(())
}

/// Identifier of a constraint definition (e.g. `max-concurrent-per-env`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintId(String);

impl ConstraintId {
    /// Creates a new constraint ID after validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is empty, too long, or contains control characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate("constraint ID", &id)?;
        Ok(Self(id))
    }

    /// Creates a constraint ID without validation.
    ///
    /// Intended for IDs that have already been validated (e.g., read back from a registry).
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the constraint ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConstraintId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for ConstraintId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Scope in which a constraint's capacity is counted (e.g. an environment name).
///
/// One constraint governs any number of units; usage is tracked independently
/// per unit while capacity and strategy are shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintUnit(String);

impl ConstraintUnit {
    /// Creates a new unit after validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit is empty, too long, or contains control characters.
    pub fn new(unit: impl Into<String>) -> Result<Self> {
        let unit = unit.into();
        validate("constraint unit", &unit)?;
        Ok(Self(unit))
    }

    /// Creates a unit without validation.
    #[must_use]
    pub fn new_unchecked(unit: impl Into<String>) -> Self {
        Self(unit.into())
    }

    /// Returns the unit as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConstraintUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConstraintUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for ConstraintUnit {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of one admission request, unique within a constraint unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerId(String);

impl ConsumerId {
    /// Creates a new consumer ID after validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is empty, too long, or contains control characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate("consumer ID", &id)?;
        Ok(Self(id))
    }

    /// Generates a new unique consumer ID.
    ///
    /// Uses ULID generation, so generated IDs sort by creation time. Admission
    /// order never relies on this; the registry assigns `order` itself.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Creates a consumer ID without validation.
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the consumer ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConsumerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for ConsumerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ids() {
        assert!(ConstraintId::new("max-concurrent-per-env").is_ok());
        assert!(ConstraintUnit::new("us-east-1/production").is_ok());
        assert!(ConsumerId::new("01HX0000000000000000000001").is_ok());
    }

    #[test]
    fn invalid_ids() {
        assert!(ConstraintId::new("").is_err());
        assert!(ConstraintUnit::new("line\nbreak").is_err());
        assert!(ConsumerId::new("x".repeat(MAX_ID_LEN + 1)).is_err());
        assert!(ConsumerId::new("x".repeat(MAX_ID_LEN)).is_ok());
    }

    #[test]
    fn generated_consumer_ids_are_unique() {
        let id1 = ConsumerId::generate();
        let id2 = ConsumerId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn consumer_id_roundtrip() {
        let id = ConsumerId::generate();
        let parsed: ConsumerId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn ids_serialize_transparently() {
        let unit = ConstraintUnit::new("staging").unwrap();
        let json = serde_json::to_string(&unit).unwrap();
        assert_eq!(json, "\"staging\"");
    }
}
