//! Pluggable storage for constraints and their consumers.
//!
//! The [`ConstraintRegistry`] trait is the persistence contract the engine
//! is written against. Callers are independent processes sharing one store,
//! so every guarantee the engine makes rests on the registry's atomic
//! primitives rather than on in-process locks.
//!
//! ## Design Principles
//!
//! - **Optimistic concurrency**: Each unit carries a version; reads return it
//!   as a [`SnapshotToken`] and conditional writes fail with a conflict when
//!   it has moved
//! - **CAS transitions**: State changes are compare-and-set on one consumer
//! - **Registry-assigned order**: `order` is allocated at insert time, never
//!   by the caller's clock
//! - **Testability**: [`memory::InMemoryRegistry`] for tests and
//!   single-process deployments; a document or SQL store for production

pub mod memory;

use serde::{Deserialize, Serialize};

use bulwark_core::{ConstraintId, ConstraintUnit, ConsumerId};

use crate::constraint::Constraint;
use crate::consumer::{Consumer, ConsumerState, NewConsumer};
use crate::error::Result;

/// Version of a unit's consumer set at the time it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotToken(u64);

impl SnapshotToken {
    /// Token of a unit that has never been written.
    pub const INITIAL: Self = Self(0);

    /// Creates a token from a raw version.
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// Returns the raw version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.0
    }
}

/// A unit's consumers, ordered by `order`, plus the version they were read at.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSnapshot {
    /// Consumers in registration order.
    pub consumers: Vec<Consumer>,
    /// Version of the unit at read time.
    pub token: SnapshotToken,
}

impl ConsumerSnapshot {
    /// An empty snapshot of a unit that has never been written.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            consumers: Vec::new(),
            token: SnapshotToken::INITIAL,
        }
    }

    /// Finds a consumer by ID.
    #[must_use]
    pub fn find(&self, consumer_id: &ConsumerId) -> Option<&Consumer> {
        self.consumers.iter().find(|c| &c.id == consumer_id)
    }

    /// Iterates over BLOCKED consumers in registration order.
    pub fn blocked(&self) -> impl Iterator<Item = &Consumer> {
        self.consumers.iter().filter(|c| c.is_blocked())
    }

    /// Iterates over ACTIVE consumers in registration order.
    pub fn active(&self) -> impl Iterator<Item = &Consumer> {
        self.consumers.iter().filter(|c| c.is_active())
    }
}

/// An ACTIVE consumer located by its holding scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopedConsumer {
    /// Constraint the consumer holds permits on.
    pub constraint_id: ConstraintId,
    /// Unit within the constraint.
    pub unit: ConstraintUnit,
    /// The consumer.
    pub consumer_id: ConsumerId,
}

/// Result of saving a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The constraint was stored.
    Saved,
    /// A constraint with the same ID already exists.
    AlreadyExists,
}

/// Result of a conditional consumer insert.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// Inserted; carries the stored consumer with its assigned `order`.
    Inserted(Consumer),
    /// The unit changed since the snapshot was read.
    Conflict {
        /// The unit's current version.
        current: SnapshotToken,
    },
    /// A consumer with the same ID already exists in the unit.
    DuplicateConsumer,
}

/// Precondition attached to a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionGuard {
    /// Only the consumer's current state is compared.
    Unconditional,
    /// The unit must also still be at this version.
    ///
    /// Used for transitions that consume capacity, so two racing callers
    /// cannot both act on the same free permits.
    Snapshot(SnapshotToken),
}

/// Result of a compare-and-set state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was applied.
    Applied,
    /// Nothing to do: the consumer is missing or no longer in the expected state.
    NotApplicable,
    /// The snapshot guard no longer matches the unit's version.
    Stale {
        /// The unit's current version.
        current: SnapshotToken,
    },
}

impl TransitionOutcome {
    /// Returns true if the transition was applied.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Storage abstraction for constraints and consumers.
///
/// ## Atomicity
///
/// Every method must be atomic with respect to concurrent callers, including
/// callers in other processes:
/// - `try_insert_consumer` succeeds only if the unit is still at the expected
///   version, and assigns `order` in the same atomic step
/// - `try_transition` is a compare-and-set on a single consumer's state
/// - every applied insert or transition advances the unit's version
///
/// Expected contention (`Conflict`, `NotApplicable`, `Stale`) is reported in
/// the outcome types. `Err` is reserved for store failures.
pub trait ConstraintRegistry: Send + Sync {
    /// Stores a new constraint.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    fn save(&self, constraint: &Constraint) -> Result<SaveOutcome>;

    /// Loads a constraint.
    ///
    /// Returns `None` if the constraint does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    fn load(&self, id: &ConstraintId) -> Result<Option<Constraint>>;

    /// Loads every consumer of a unit in `order`, with the unit's version.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    fn load_consumers(&self, id: &ConstraintId, unit: &ConstraintUnit)
    -> Result<ConsumerSnapshot>;

    /// Inserts a consumer if the unit is still at `expected`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    fn try_insert_consumer(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
        consumer: NewConsumer,
        expected: SnapshotToken,
    ) -> Result<InsertOutcome>;

    /// Moves a consumer from `from` to `to` if it is still in `from`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidTransition`] for a pair the lifecycle
    /// forbids, or an error if the store fails.
    fn try_transition(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
        consumer_id: &ConsumerId,
        from: ConsumerState,
        to: ConsumerState,
        guard: TransitionGuard,
    ) -> Result<TransitionOutcome>;

    /// Lists constraints with at least one BLOCKED consumer.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    fn blocked_constraints(&self) -> Result<Vec<ConstraintId>>;

    /// Lists the units of a constraint holding BLOCKED or ACTIVE consumers.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    fn units(&self, id: &ConstraintId) -> Result<Vec<ConstraintUnit>>;

    /// Returns true if `holder` and `candidate` belong to the same holding scope.
    ///
    /// Permits held by the candidate's own scope are not released until the
    /// candidate has run, so registration counts them as unavailable. The
    /// default treats every consumer as its own scope.
    fn overlapping_scope(&self, holder: &Consumer, candidate: &NewConsumer) -> bool {
        let _ = (holder, candidate);
        false
    }

    /// Lists the ACTIVE consumers, across every constraint and unit, whose
    /// holding scope is `scope`.
    ///
    /// Registries without a notion of holding scope return nothing, which is
    /// the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    fn active_in_scope(&self, scope: &serde_json::Value) -> Result<Vec<ScopedConsumer>> {
        let _ = scope;
        Ok(Vec::new())
    }
}

/// Rejects transitions outside the consumer lifecycle.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidTransition`] if `from -> to` is not legal.
pub fn check_transition(from: ConsumerState, to: ConsumerState) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(crate::error::Error::InvalidTransition { from, to })
    }
}
