//! Usage reports.
//!
//! Which consumers currently hold permits on a constraint, across all of its
//! units. Intended for dashboards and operators deciding whether a resource
//! is stuck.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bulwark_core::{ConstraintId, ConstraintUnit, ConsumerId};

use crate::consumer::{Consumer, ConsumerContext};

/// One ACTIVE consumer holding permits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveScope {
    /// Unit the permits are held in.
    pub unit: ConstraintUnit,
    /// The holding consumer.
    pub consumer_id: ConsumerId,
    /// Permits held.
    pub permits: u32,
    /// When the permits were acquired.
    pub acquired_at: Option<DateTime<Utc>>,
    /// Opaque caller metadata.
    pub context: ConsumerContext,
}

impl ActiveScope {
    pub(crate) fn from_consumer(unit: &ConstraintUnit, consumer: &Consumer) -> Self {
        Self {
            unit: unit.clone(),
            consumer_id: consumer.id.clone(),
            permits: consumer.permits,
            acquired_at: consumer.acquired_at,
            context: consumer.context.clone(),
        }
    }
}

/// Permits in use on a constraint, across its units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintUsage {
    /// The constraint reported on.
    pub constraint_id: ConstraintId,
    /// Capacity per unit.
    pub limits: u32,
    /// ACTIVE consumers, grouped by unit and in registration order within a unit.
    pub active_scopes: Vec<ActiveScope>,
}

impl ConstraintUsage {
    /// Returns the permits in use in `unit`.
    #[must_use]
    pub fn used_permits(&self, unit: &ConstraintUnit) -> u64 {
        self.active_scopes
            .iter()
            .filter(|scope| &scope.unit == unit)
            .map(|scope| u64::from(scope.permits))
            .sum()
    }

    /// Returns true if no permits are held anywhere.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.active_scopes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(unit: &str, id: &str, permits: u32) -> ActiveScope {
        ActiveScope {
            unit: ConstraintUnit::new_unchecked(unit),
            consumer_id: ConsumerId::new_unchecked(id),
            permits,
            acquired_at: None,
            context: ConsumerContext::new(),
        }
    }

    #[test]
    fn used_permits_per_unit() {
        let usage = ConstraintUsage {
            constraint_id: ConstraintId::new_unchecked("deploy-slots"),
            limits: 10,
            active_scopes: vec![
                scope("staging", "a", 2),
                scope("production", "b", 5),
                scope("staging", "c", 3),
            ],
        };
        assert_eq!(usage.used_permits(&ConstraintUnit::new_unchecked("staging")), 5);
        assert_eq!(usage.used_permits(&ConstraintUnit::new_unchecked("production")), 5);
        assert_eq!(usage.used_permits(&ConstraintUnit::new_unchecked("dev")), 0);
        assert!(!usage.is_idle());
    }
}
