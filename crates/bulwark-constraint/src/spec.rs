//! Constraint specifications.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::strategy::Strategy;

/// Capacity and admission strategy of a constraint.
///
/// Immutable once a constraint is created; changing capacity or strategy
/// means creating a new constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSpec")]
pub struct Spec {
    strategy: Strategy,
    limits: u32,
}

/// Unvalidated wire shape of a [`Spec`].
#[derive(Deserialize)]
struct RawSpec {
    strategy: Strategy,
    limits: u32,
}

impl TryFrom<RawSpec> for Spec {
    type Error = Error;

    fn try_from(raw: RawSpec) -> Result<Self> {
        Self::new(raw.strategy, raw.limits)
    }
}

impl Spec {
    /// Creates a spec with the given strategy and capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] if `limits` is zero.
    pub fn new(strategy: Strategy, limits: u32) -> Result<Self> {
        if limits == 0 {
            return Err(Error::InvalidSpec {
                message: "limits must be a positive capacity".to_string(),
            });
        }
        Ok(Self { strategy, limits })
    }

    /// Returns the admission strategy.
    #[must_use]
    pub const fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Returns the capacity shared by every unit of the constraint.
    #[must_use]
    pub const fn limits(&self) -> u32 {
        self.limits
    }

    /// Returns true if `permits` is a legal request under this spec.
    #[must_use]
    pub const fn accepts_permits(&self, permits: u32) -> bool {
        permits >= 1 && permits <= self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limits_rejected() {
        let err = Spec::new(Strategy::Fifo, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidSpec { .. }));
    }

    #[test]
    fn permit_bounds() {
        let spec = Spec::new(Strategy::Asap, 10).unwrap();
        assert!(!spec.accepts_permits(0));
        assert!(spec.accepts_permits(1));
        assert!(spec.accepts_permits(10));
        assert!(!spec.accepts_permits(11));
    }

    #[test]
    fn spec_serialization_shape() {
        let spec = Spec::new(Strategy::Fifo, 3).unwrap();
        let json = serde_json::to_value(spec).unwrap();
        assert_eq!(json, serde_json::json!({"strategy": "FIFO", "limits": 3}));
    }

    #[test]
    fn deserialization_validates_limits() {
        let parsed: std::result::Result<Spec, _> =
            serde_json::from_str(r#"{"strategy": "ASAP", "limits": 0}"#);
        assert!(parsed.is_err());

        let spec: Spec = serde_json::from_str(r#"{"strategy": "ASAP", "limits": 4}"#).unwrap();
        assert_eq!(spec.limits(), 4);
        assert_eq!(spec.strategy(), Strategy::Asap);
    }
}
