//! In-memory registry implementation.
//!
//! This module provides [`InMemoryRegistry`], a simple in-memory implementation
//! of the [`ConstraintRegistry`] trait suitable for testing and for
//! single-process deployments.
//!
//! ## Limitations
//!
//! - **No cross-process coordination**: Replicas sharing a resource need a
//!   CAS-capable store behind the same trait
//! - **No persistence**: All state is lost when the process exits

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use chrono::Utc;

use bulwark_core::{ConstraintId, ConstraintUnit, ConsumerId};

use super::{
    ConstraintRegistry, ConsumerSnapshot, InsertOutcome, SaveOutcome, ScopedConsumer,
    SnapshotToken, TransitionGuard, TransitionOutcome, check_transition,
};
use crate::constraint::Constraint;
use crate::consumer::{Consumer, ConsumerState, NewConsumer};
use crate::error::{Error, Result};

/// Consumers of one unit, with the version and order counters guarding them.
#[derive(Debug, Default)]
struct UnitRecord {
    /// Bumped on every applied insert or transition.
    version: u64,
    /// Last `order` handed out.
    last_order: u64,
    /// Consumers in `order`.
    consumers: Vec<Consumer>,
}

impl UnitRecord {
    fn token(&self) -> SnapshotToken {
        SnapshotToken::new(self.version)
    }

    fn has_pending(&self) -> bool {
        self.consumers
            .iter()
            .any(|c| matches!(c.state, ConsumerState::Active | ConsumerState::Blocked))
    }
}

/// A stored constraint and its units.
#[derive(Debug)]
struct ConstraintRecord {
    constraint: Constraint,
    units: BTreeMap<ConstraintUnit, UnitRecord>,
}

/// In-memory constraint registry.
///
/// Provides a thread-safe implementation of the [`ConstraintRegistry`] trait
/// using a single `RwLock`, so every operation is trivially atomic.
///
/// ## Example
///
/// ```rust
/// use bulwark_constraint::registry::memory::InMemoryRegistry;
///
/// let registry = InMemoryRegistry::new();
/// // Create constraints against the registry...
/// ```
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    constraints: RwLock<HashMap<ConstraintId, ConstraintRecord>>,
    /// Context key identifying a consumer's holding scope, if any.
    scope_key: Option<String>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("constraint registry lock poisoned")
}

impl InMemoryRegistry {
    /// Creates an empty registry in which every consumer is its own scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that treats consumers with equal `scope_key`
    /// context values as belonging to the same holding scope.
    #[must_use]
    pub fn with_scope_key(scope_key: impl Into<String>) -> Self {
        Self {
            constraints: RwLock::new(HashMap::new()),
            scope_key: Some(scope_key.into()),
        }
    }

    /// Returns the number of stored constraints.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn constraint_count(&self) -> Result<usize> {
        let count = {
            let constraints = self.constraints.read().map_err(poison_err)?;
            constraints.len()
        };
        Ok(count)
    }
}

impl ConstraintRegistry for InMemoryRegistry {
    fn save(&self, constraint: &Constraint) -> Result<SaveOutcome> {
        let mut constraints = self.constraints.write().map_err(poison_err)?;

        if constraints.contains_key(constraint.id()) {
            drop(constraints);
            return Ok(SaveOutcome::AlreadyExists);
        }

        constraints.insert(
            constraint.id().clone(),
            ConstraintRecord {
                constraint: Constraint::new(constraint.id().clone(), *constraint.spec()),
                units: BTreeMap::new(),
            },
        );
        drop(constraints);
        Ok(SaveOutcome::Saved)
    }

    fn load(&self, id: &ConstraintId) -> Result<Option<Constraint>> {
        let result = {
            let constraints = self.constraints.read().map_err(poison_err)?;
            constraints.get(id).map(|record| record.constraint.clone())
        };
        Ok(result)
    }

    fn load_consumers(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
    ) -> Result<ConsumerSnapshot> {
        let result = {
            let constraints = self.constraints.read().map_err(poison_err)?;
            constraints
                .get(id)
                .and_then(|record| record.units.get(unit))
                .map_or_else(ConsumerSnapshot::empty, |record| ConsumerSnapshot {
                    consumers: record.consumers.clone(),
                    token: record.token(),
                })
        };
        Ok(result)
    }

    fn try_insert_consumer(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
        consumer: NewConsumer,
        expected: SnapshotToken,
    ) -> Result<InsertOutcome> {
        let mut constraints = self.constraints.write().map_err(poison_err)?;

        let Some(record) = constraints.get_mut(id) else {
            drop(constraints);
            return Err(Error::storage(format!("no constraint with id {id}")));
        };

        let unit_record = record.units.entry(unit.clone()).or_default();

        if unit_record.token() != expected {
            let current = unit_record.token();
            drop(constraints);
            return Ok(InsertOutcome::Conflict { current });
        }

        if unit_record.consumers.iter().any(|c| c.id == consumer.id) {
            drop(constraints);
            return Ok(InsertOutcome::DuplicateConsumer);
        }

        unit_record.last_order += 1;
        unit_record.version += 1;

        let acquired_at = (consumer.state == ConsumerState::Active).then(Utc::now);
        let stored = Consumer {
            id: consumer.id,
            permits: consumer.permits,
            state: consumer.state,
            order: unit_record.last_order,
            context: consumer.context,
            acquired_at,
        };
        unit_record.consumers.push(stored.clone());
        drop(constraints);

        Ok(InsertOutcome::Inserted(stored))
    }

    fn try_transition(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
        consumer_id: &ConsumerId,
        from: ConsumerState,
        to: ConsumerState,
        guard: TransitionGuard,
    ) -> Result<TransitionOutcome> {
        check_transition(from, to)?;

        let mut constraints = self.constraints.write().map_err(poison_err)?;

        let Some(unit_record) = constraints
            .get_mut(id)
            .and_then(|record| record.units.get_mut(unit))
        else {
            drop(constraints);
            return Ok(TransitionOutcome::NotApplicable);
        };

        if let TransitionGuard::Snapshot(expected) = guard {
            if unit_record.token() != expected {
                let current = unit_record.token();
                drop(constraints);
                return Ok(TransitionOutcome::Stale { current });
            }
        }

        let Some(consumer) = unit_record
            .consumers
            .iter_mut()
            .find(|c| &c.id == consumer_id)
        else {
            drop(constraints);
            return Ok(TransitionOutcome::NotApplicable);
        };

        if consumer.state != from {
            drop(constraints);
            return Ok(TransitionOutcome::NotApplicable);
        }

        consumer.state = to;
        if to == ConsumerState::Active {
            consumer.acquired_at = Some(Utc::now());
        }
        unit_record.version += 1;
        drop(constraints);

        Ok(TransitionOutcome::Applied)
    }

    fn blocked_constraints(&self) -> Result<Vec<ConstraintId>> {
        let mut result: Vec<ConstraintId> = {
            let constraints = self.constraints.read().map_err(poison_err)?;
            constraints
                .iter()
                .filter(|(_, record)| {
                    record
                        .units
                        .values()
                        .any(|unit| unit.consumers.iter().any(Consumer::is_blocked))
                })
                .map(|(id, _)| id.clone())
                .collect()
        };
        result.sort();
        Ok(result)
    }

    fn units(&self, id: &ConstraintId) -> Result<Vec<ConstraintUnit>> {
        let result = {
            let constraints = self.constraints.read().map_err(poison_err)?;
            constraints.get(id).map_or_else(Vec::new, |record| {
                record
                    .units
                    .iter()
                    .filter(|(_, unit)| unit.has_pending())
                    .map(|(unit, _)| unit.clone())
                    .collect()
            })
        };
        Ok(result)
    }

    fn overlapping_scope(&self, holder: &Consumer, candidate: &NewConsumer) -> bool {
        let Some(key) = self.scope_key.as_deref() else {
            return false;
        };
        match (holder.context.get(key), candidate.context.get(key)) {
            (Some(held), Some(wanted)) => !held.is_null() && held == wanted,
            _ => false,
        }
    }

    fn active_in_scope(&self, scope: &serde_json::Value) -> Result<Vec<ScopedConsumer>> {
        let Some(key) = self.scope_key.as_deref() else {
            return Ok(Vec::new());
        };
        if scope.is_null() {
            return Ok(Vec::new());
        }

        let mut result = Vec::new();
        {
            let constraints = self.constraints.read().map_err(poison_err)?;
            for (id, record) in constraints.iter() {
                for (unit, unit_record) in &record.units {
                    result.extend(
                        unit_record
                            .consumers
                            .iter()
                            .filter(|c| c.is_active() && c.context.get(key) == Some(scope))
                            .map(|c| ScopedConsumer {
                                constraint_id: id.clone(),
                                unit: unit.clone(),
                                consumer_id: c.id.clone(),
                            }),
                    );
                }
            }
        }
        result.sort();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::ConsumerContext;
    use crate::spec::Spec;
    use crate::strategy::Strategy;

    fn setup() -> (InMemoryRegistry, ConstraintId, ConstraintUnit) {
        let registry = InMemoryRegistry::new();
        let id = ConstraintId::new_unchecked("deploy-slots");
        let constraint = Constraint::new(id.clone(), Spec::new(Strategy::Fifo, 10).unwrap());
        assert_eq!(registry.save(&constraint).unwrap(), SaveOutcome::Saved);
        (registry, id, ConstraintUnit::new_unchecked("production"))
    }

    fn new_consumer(id: &str, permits: u32, state: ConsumerState) -> NewConsumer {
        NewConsumer {
            id: ConsumerId::new_unchecked(id),
            permits,
            state,
            context: ConsumerContext::new(),
        }
    }

    #[test]
    fn save_twice_reports_existing() {
        let (registry, id, _) = setup();
        let again = Constraint::new(id, Spec::new(Strategy::Asap, 1).unwrap());
        assert_eq!(registry.save(&again).unwrap(), SaveOutcome::AlreadyExists);
        assert_eq!(registry.constraint_count().unwrap(), 1);
    }

    #[test]
    fn load_missing_constraint_is_none() {
        let registry = InMemoryRegistry::new();
        let loaded = registry
            .load(&ConstraintId::new_unchecked("missing"))
            .unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn insert_assigns_increasing_order_and_bumps_version() {
        let (registry, id, unit) = setup();

        let snapshot = registry.load_consumers(&id, &unit).unwrap();
        assert_eq!(snapshot.token, SnapshotToken::INITIAL);

        let first = registry
            .try_insert_consumer(
                &id,
                &unit,
                new_consumer("a", 1, ConsumerState::Active),
                snapshot.token,
            )
            .unwrap();
        let InsertOutcome::Inserted(first) = first else {
            panic!("expected insert, got {first:?}");
        };
        assert_eq!(first.order, 1);
        assert!(first.acquired_at.is_some());

        let snapshot = registry.load_consumers(&id, &unit).unwrap();
        let second = registry
            .try_insert_consumer(
                &id,
                &unit,
                new_consumer("b", 10, ConsumerState::Blocked),
                snapshot.token,
            )
            .unwrap();
        let InsertOutcome::Inserted(second) = second else {
            panic!("expected insert, got {second:?}");
        };
        assert_eq!(second.order, 2);
        assert!(second.acquired_at.is_none());

        let snapshot = registry.load_consumers(&id, &unit).unwrap();
        assert_eq!(snapshot.token, SnapshotToken::new(2));
        let orders: Vec<u64> = snapshot.consumers.iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![1, 2]);
    }

    #[test]
    fn stale_insert_conflicts() {
        let (registry, id, unit) = setup();
        let stale = registry.load_consumers(&id, &unit).unwrap().token;

        registry
            .try_insert_consumer(&id, &unit, new_consumer("a", 1, ConsumerState::Active), stale)
            .unwrap();

        let outcome = registry
            .try_insert_consumer(&id, &unit, new_consumer("b", 1, ConsumerState::Active), stale)
            .unwrap();
        assert_eq!(
            outcome,
            InsertOutcome::Conflict {
                current: SnapshotToken::new(1)
            }
        );
    }

    #[test]
    fn duplicate_consumer_rejected() {
        let (registry, id, unit) = setup();
        let token = registry.load_consumers(&id, &unit).unwrap().token;
        registry
            .try_insert_consumer(&id, &unit, new_consumer("a", 1, ConsumerState::Active), token)
            .unwrap();

        let token = registry.load_consumers(&id, &unit).unwrap().token;
        let outcome = registry
            .try_insert_consumer(&id, &unit, new_consumer("a", 2, ConsumerState::Active), token)
            .unwrap();
        assert_eq!(outcome, InsertOutcome::DuplicateConsumer);
    }

    #[test]
    fn insert_into_unknown_constraint_fails() {
        let registry = InMemoryRegistry::new();
        let result = registry.try_insert_consumer(
            &ConstraintId::new_unchecked("missing"),
            &ConstraintUnit::new_unchecked("production"),
            new_consumer("a", 1, ConsumerState::Active),
            SnapshotToken::INITIAL,
        );
        assert!(matches!(result, Err(Error::Storage { .. })));
    }

    #[test]
    fn transition_is_compare_and_set() {
        let (registry, id, unit) = setup();
        let token = registry.load_consumers(&id, &unit).unwrap().token;
        registry
            .try_insert_consumer(&id, &unit, new_consumer("a", 1, ConsumerState::Active), token)
            .unwrap();
        let a = ConsumerId::new_unchecked("a");

        let first = registry
            .try_transition(
                &id,
                &unit,
                &a,
                ConsumerState::Active,
                ConsumerState::Finished,
                TransitionGuard::Unconditional,
            )
            .unwrap();
        assert_eq!(first, TransitionOutcome::Applied);

        let second = registry
            .try_transition(
                &id,
                &unit,
                &a,
                ConsumerState::Active,
                ConsumerState::Finished,
                TransitionGuard::Unconditional,
            )
            .unwrap();
        assert_eq!(second, TransitionOutcome::NotApplicable);
    }

    #[test]
    fn snapshot_guard_detects_stale_version() {
        let (registry, id, unit) = setup();
        let token = registry.load_consumers(&id, &unit).unwrap().token;
        registry
            .try_insert_consumer(&id, &unit, new_consumer("a", 5, ConsumerState::Blocked), token)
            .unwrap();
        let stale = registry.load_consumers(&id, &unit).unwrap().token;
        registry
            .try_insert_consumer(&id, &unit, new_consumer("b", 5, ConsumerState::Blocked), stale)
            .unwrap();

        let outcome = registry
            .try_transition(
                &id,
                &unit,
                &ConsumerId::new_unchecked("a"),
                ConsumerState::Blocked,
                ConsumerState::Active,
                TransitionGuard::Snapshot(stale),
            )
            .unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Stale {
                current: SnapshotToken::new(2)
            }
        );
    }

    #[test]
    fn illegal_transition_is_an_error() {
        let (registry, id, unit) = setup();
        let result = registry.try_transition(
            &id,
            &unit,
            &ConsumerId::new_unchecked("a"),
            ConsumerState::Blocked,
            ConsumerState::Finished,
            TransitionGuard::Unconditional,
        );
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
    }

    #[test]
    fn blocked_constraints_and_units() {
        let (registry, id, unit) = setup();
        assert!(registry.blocked_constraints().unwrap().is_empty());

        let token = registry.load_consumers(&id, &unit).unwrap().token;
        registry
            .try_insert_consumer(&id, &unit, new_consumer("a", 3, ConsumerState::Blocked), token)
            .unwrap();

        assert_eq!(registry.blocked_constraints().unwrap(), vec![id.clone()]);
        assert_eq!(registry.units(&id).unwrap(), vec![unit]);
    }

    #[test]
    fn units_skip_fully_finished() {
        let (registry, id, unit) = setup();
        let token = registry.load_consumers(&id, &unit).unwrap().token;
        registry
            .try_insert_consumer(&id, &unit, new_consumer("a", 1, ConsumerState::Active), token)
            .unwrap();
        registry
            .try_transition(
                &id,
                &unit,
                &ConsumerId::new_unchecked("a"),
                ConsumerState::Active,
                ConsumerState::Finished,
                TransitionGuard::Unconditional,
            )
            .unwrap();

        assert!(registry.units(&id).unwrap().is_empty());
    }

    #[test]
    fn scope_overlap_by_context_key() {
        let registry = InMemoryRegistry::with_scope_key("execution");
        let mut context = ConsumerContext::new();
        context.insert("execution".into(), serde_json::json!("wf-1"));

        let holder = Consumer {
            id: ConsumerId::new_unchecked("a"),
            permits: 1,
            state: ConsumerState::Active,
            order: 1,
            context: context.clone(),
            acquired_at: None,
        };
        let same = NewConsumer {
            id: ConsumerId::new_unchecked("b"),
            permits: 1,
            state: ConsumerState::Blocked,
            context,
        };
        let other = NewConsumer {
            context: ConsumerContext::new(),
            ..same.clone()
        };

        assert!(registry.overlapping_scope(&holder, &same));
        assert!(!registry.overlapping_scope(&holder, &other));
        assert!(!InMemoryRegistry::new().overlapping_scope(&holder, &same));
    }

    #[test]
    fn active_in_scope_lists_only_active_holders_of_that_scope() {
        let registry = InMemoryRegistry::with_scope_key("execution");
        let id = ConstraintId::new_unchecked("deploy-slots");
        let constraint = Constraint::new(id.clone(), Spec::new(Strategy::Asap, 10).unwrap());
        registry.save(&constraint).unwrap();

        let scoped = |consumer: &str, execution: &str, state: ConsumerState| {
            let mut context = ConsumerContext::new();
            context.insert("execution".into(), serde_json::json!(execution));
            NewConsumer {
                context,
                ..new_consumer(consumer, 1, state)
            }
        };

        let production = ConstraintUnit::new_unchecked("production");
        let staging = ConstraintUnit::new_unchecked("staging");
        for (unit, consumer) in [
            (&production, scoped("a", "wf-1", ConsumerState::Active)),
            (&production, scoped("b", "wf-1", ConsumerState::Blocked)),
            (&production, scoped("c", "wf-2", ConsumerState::Active)),
            (&staging, scoped("d", "wf-1", ConsumerState::Active)),
        ] {
            let token = registry.load_consumers(&id, unit).unwrap().token;
            registry
                .try_insert_consumer(&id, unit, consumer, token)
                .unwrap();
        }

        let found = registry
            .active_in_scope(&serde_json::json!("wf-1"))
            .unwrap();
        let ids: Vec<_> = found.iter().map(|s| s.consumer_id.as_str()).collect();
        assert_eq!(ids, ["a", "d"]);
        assert_eq!(found[1].unit, staging);

        assert!(registry.active_in_scope(&serde_json::Value::Null).unwrap().is_empty());
        assert!(
            InMemoryRegistry::new()
                .active_in_scope(&serde_json::json!("wf-1"))
                .unwrap()
                .is_empty()
        );
    }
}
