//! Constraints and the admission operations on them.
//!
//! A [`Constraint`] is an immutable `(id, spec)` pair. Every operation reads
//! the unit's consumers from a [`ConstraintRegistry`], decides locally, and
//! writes back with a conditional registry primitive. The engine itself holds
//! no locks; a lost race shows up as a conflict and is retried against a
//! fresh read.
//!
//! # Example
//!
//! ```rust
//! use bulwark_constraint::prelude::*;
//! use bulwark_constraint::registry::memory::InMemoryRegistry;
//!
//! let registry = InMemoryRegistry::new();
//! let spec = Spec::new(Strategy::Fifo, 2).unwrap();
//! let constraint =
//!     Constraint::create(ConstraintId::new("deploy-slots").unwrap(), spec, &registry).unwrap();
//!
//! let unit = ConstraintUnit::new("production").unwrap();
//! let state = constraint
//!     .register_consumer(&unit, ConsumerId::new("run-1").unwrap(), 2, ConsumerContext::new(), &registry)
//!     .unwrap();
//! assert_eq!(state, ConsumerState::Active);
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use bulwark_core::config::{DEFAULT_MAX_REGISTER_ATTEMPTS, DEFAULT_MAX_UNBLOCK_ATTEMPTS};
use bulwark_core::observability::constraint_span;
use bulwark_core::{ConstraintId, ConstraintUnit, ConsumerId, EngineConfig};

use crate::consumer::{Consumer, ConsumerContext, ConsumerState, NewConsumer, active_usage};
use crate::error::{Error, Result};
use crate::metrics;
use crate::registry::{
    ConstraintRegistry, ConsumerSnapshot, InsertOutcome, SaveOutcome, TransitionGuard,
    TransitionOutcome,
};
use crate::runnable::RunnableConsumers;
use crate::spec::Spec;
use crate::strategy::Strategy;
use crate::usage::{ActiveScope, ConstraintUsage};

/// Bounds on the optimistic read-decide-write loops.
///
/// Not persisted; every process applies its own policy to the constraints
/// it loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts `register_consumer` makes before giving up.
    pub max_register_attempts: u32,
    /// Attempts `consumer_unblocked` makes when its snapshot goes stale.
    pub max_unblock_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_register_attempts: DEFAULT_MAX_REGISTER_ATTEMPTS,
            max_unblock_attempts: DEFAULT_MAX_UNBLOCK_ATTEMPTS,
        }
    }
}

impl From<&EngineConfig> for RetryPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_register_attempts: config.max_register_attempts,
            max_unblock_attempts: config.max_unblock_attempts,
        }
    }
}

/// A named, capacity-bounded resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    id: ConstraintId,
    spec: Spec,
    #[serde(skip)]
    retry: RetryPolicy,
}

impl Constraint {
    /// Creates a constraint value without persisting it.
    ///
    /// Use [`Constraint::create`] to register a new constraint with a
    /// registry; this constructor is for registries rebuilding stored values.
    #[must_use]
    pub fn new(id: ConstraintId, spec: Spec) -> Self {
        Self {
            id,
            spec,
            retry: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the constraint ID.
    #[must_use]
    pub const fn id(&self) -> &ConstraintId {
        &self.id
    }

    /// Returns the spec.
    #[must_use]
    pub const fn spec(&self) -> &Spec {
        &self.spec
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Persists a new constraint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnableToSaveConstraint`] if a constraint with the same
    /// ID already exists or the registry fails; the registry failure is kept
    /// as the error source.
    pub fn create<R>(id: ConstraintId, spec: Spec, registry: &R) -> Result<Self>
    where
        R: ConstraintRegistry + ?Sized,
    {
        let constraint = Self::new(id, spec);

        match registry.save(&constraint) {
            Ok(SaveOutcome::Saved) => {
                info!(
                    constraint_id = %constraint.id,
                    strategy = %spec.strategy(),
                    limits = spec.limits(),
                    "constraint created"
                );
                Ok(constraint)
            }
            Ok(SaveOutcome::AlreadyExists) => Err(Error::UnableToSaveConstraint {
                constraint_id: constraint.id,
                reason: "a constraint with this id already exists".to_string(),
                source: None,
            }),
            Err(e) => Err(Error::UnableToSaveConstraint {
                constraint_id: constraint.id,
                reason: "registry write failed".to_string(),
                source: Some(Box::new(e)),
            }),
        }
    }

    /// Loads a constraint. `None` means no such constraint exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry fails.
    pub fn load<R>(id: &ConstraintId, registry: &R) -> Result<Option<Self>>
    where
        R: ConstraintRegistry + ?Sized,
    {
        registry.load(id)
    }

    /// Registers a consumer and decides its initial state.
    ///
    /// Reads the unit, applies the strategy's admission rule and inserts the
    /// consumer conditionally on the unit being unchanged. A conflicting
    /// writer forces a fresh read, up to the policy's attempt bound.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPermits`] if `permits` is outside `[1, limits]`;
    ///   nothing is created
    /// - [`Error::PermanentlyBlockedConsumer`] if the consumer would block
    ///   and the permits its own holding scope keeps ACTIVE leave no room
    ///   for it (or, under FIFO, for a consumer queued ahead of it)
    /// - [`Error::UnableToRegisterConsumer`] if the ID is already registered
    ///   in the unit or every attempt hit a conflict
    /// - [`Error::Storage`] if the registry fails
    pub fn register_consumer<R>(
        &self,
        unit: &ConstraintUnit,
        consumer_id: ConsumerId,
        permits: u32,
        context: ConsumerContext,
        registry: &R,
    ) -> Result<ConsumerState>
    where
        R: ConstraintRegistry + ?Sized,
    {
        let _guard =
            constraint_span("register_consumer", self.id.as_str(), unit.as_str()).entered();

        let limits = self.spec.limits();
        if !self.spec.accepts_permits(permits) {
            metrics::record_register_failure("invalid_permits");
            return Err(Error::InvalidPermits { permits, limits });
        }

        let strategy = self.spec.strategy();
        let max_attempts = self.retry.max_register_attempts.max(1);
        let mut candidate = NewConsumer {
            id: consumer_id.clone(),
            permits,
            state: ConsumerState::Blocked,
            context,
        };

        for attempt in 1..=max_attempts {
            let snapshot = registry.load_consumers(&self.id, unit)?;
            let current_usage = active_usage(&snapshot.consumers);
            let blocked_ahead = snapshot.blocked().count();
            let state = strategy.admit(current_usage, permits, limits, blocked_ahead);

            debug!(
                consumer_id = %consumer_id,
                attempt,
                current_usage,
                permits,
                blocked_ahead,
                decision = %state,
                "admission decided"
            );

            candidate.state = state;

            if state == ConsumerState::Blocked {
                if let Some(holder) =
                    self.stuck_behind_own_scope(&snapshot, &candidate, registry)
                {
                    warn!(
                        consumer_id = %consumer_id,
                        holder = %holder.id,
                        "consumer would wait on its own holding scope"
                    );
                    metrics::record_register_failure("permanently_blocked");
                    return Err(Error::PermanentlyBlockedConsumer {
                        constraint_id: self.id.clone(),
                        unit: unit.clone(),
                        consumer_id,
                        holder: holder.id.clone(),
                    });
                }
            }

            match registry.try_insert_consumer(&self.id, unit, candidate.clone(), snapshot.token)? {
                InsertOutcome::Inserted(consumer) => {
                    info!(
                        consumer_id = %consumer.id,
                        order = consumer.order,
                        permits,
                        state = %consumer.state,
                        "consumer registered"
                    );
                    metrics::record_registration(strategy, consumer.state);
                    return Ok(consumer.state);
                }
                InsertOutcome::Conflict { current } => {
                    debug!(
                        consumer_id = %consumer_id,
                        attempt,
                        expected = snapshot.token.version(),
                        current = current.version(),
                        "unit changed during registration, retrying"
                    );
                    metrics::record_register_conflict(strategy);
                }
                InsertOutcome::DuplicateConsumer => {
                    warn!(consumer_id = %consumer_id, "consumer already registered");
                    metrics::record_register_failure("duplicate");
                    return Err(Error::UnableToRegisterConsumer {
                        constraint_id: self.id.clone(),
                        unit: unit.clone(),
                        consumer_id,
                        reason: "consumer id already registered in this unit".to_string(),
                    });
                }
            }
        }

        warn!(
            consumer_id = %consumer_id,
            attempts = max_attempts,
            "registration retries exhausted"
        );
        metrics::record_register_failure("conflicts");
        Err(Error::UnableToRegisterConsumer {
            constraint_id: self.id.clone(),
            unit: unit.clone(),
            consumer_id,
            reason: format!("unit kept changing after {max_attempts} attempts"),
        })
    }

    /// Finds an ACTIVE holder whose scope keeps `candidate` out for good.
    ///
    /// The permits held by the candidate's own scope only come back after the
    /// candidate finishes. If the rest of the capacity cannot take the
    /// candidate, or under FIFO a BLOCKED consumer it queues behind, the
    /// candidate can never be admitted.
    fn stuck_behind_own_scope<'a, R>(
        &self,
        snapshot: &'a ConsumerSnapshot,
        candidate: &NewConsumer,
        registry: &R,
    ) -> Option<&'a Consumer>
    where
        R: ConstraintRegistry + ?Sized,
    {
        let mut holder = None;
        let mut held_by_scope = 0_u64;
        for consumer in snapshot
            .active()
            .filter(|consumer| registry.overlapping_scope(consumer, candidate))
        {
            holder = holder.or(Some(consumer));
            held_by_scope += u64::from(consumer.permits);
        }
        let holder = holder?;

        let limits = u64::from(self.spec.limits());
        let never_fits = |permits: u32| held_by_scope + u64::from(permits) > limits;

        let stuck = never_fits(candidate.permits)
            || (self.spec.strategy() == Strategy::Fifo
                && snapshot.blocked().any(|ahead| never_fits(ahead.permits)));
        stuck.then_some(holder)
    }

    /// Tries to admit a BLOCKED consumer.
    ///
    /// Returns `false` if the consumer is missing, no longer BLOCKED, or does
    /// not fit next to the current ACTIVE permits. The transition is guarded
    /// by the snapshot it was decided on, so two racing unblockers cannot
    /// both spend the same free permits. The context is only logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry fails.
    pub fn consumer_unblocked<R>(
        &self,
        unit: &ConstraintUnit,
        consumer_id: &ConsumerId,
        context: Option<&ConsumerContext>,
        registry: &R,
    ) -> Result<bool>
    where
        R: ConstraintRegistry + ?Sized,
    {
        let _guard =
            constraint_span("consumer_unblocked", self.id.as_str(), unit.as_str()).entered();

        if let Some(context) = context {
            debug!(consumer_id = %consumer_id, ?context, "unblock requested");
        }

        let limits = u64::from(self.spec.limits());
        let max_attempts = self.retry.max_unblock_attempts.max(1);

        for attempt in 1..=max_attempts {
            let snapshot = registry.load_consumers(&self.id, unit)?;

            let Some(consumer) = snapshot.find(consumer_id) else {
                debug!(consumer_id = %consumer_id, "consumer not found");
                return Ok(false);
            };
            if !consumer.is_blocked() {
                debug!(consumer_id = %consumer_id, state = %consumer.state, "consumer not blocked");
                return Ok(false);
            }

            let current_usage = active_usage(&snapshot.consumers);
            if current_usage + u64::from(consumer.permits) > limits {
                debug!(
                    consumer_id = %consumer_id,
                    current_usage,
                    permits = consumer.permits,
                    "consumer does not fit yet"
                );
                return Ok(false);
            }

            match registry.try_transition(
                &self.id,
                unit,
                consumer_id,
                ConsumerState::Blocked,
                ConsumerState::Active,
                TransitionGuard::Snapshot(snapshot.token),
            )? {
                TransitionOutcome::Applied => {
                    info!(consumer_id = %consumer_id, permits = consumer.permits, "consumer unblocked");
                    metrics::record_unblocked(self.spec.strategy());
                    return Ok(true);
                }
                TransitionOutcome::NotApplicable => return Ok(false),
                TransitionOutcome::Stale { current } => {
                    debug!(
                        consumer_id = %consumer_id,
                        attempt,
                        expected = snapshot.token.version(),
                        current = current.version(),
                        "unit changed during unblock, re-checking"
                    );
                }
            }
        }

        debug!(consumer_id = %consumer_id, attempts = max_attempts, "unblock gave up");
        Ok(false)
    }

    /// Releases an ACTIVE consumer's permits.
    ///
    /// Returns `true` only if this call moved the consumer to FINISHED.
    /// Finishing twice, or finishing a BLOCKED or unknown consumer, is a
    /// no-op returning `false`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry fails.
    pub fn consumer_finished<R>(
        &self,
        unit: &ConstraintUnit,
        consumer_id: &ConsumerId,
        registry: &R,
    ) -> Result<bool>
    where
        R: ConstraintRegistry + ?Sized,
    {
        let _guard =
            constraint_span("consumer_finished", self.id.as_str(), unit.as_str()).entered();

        let outcome = registry.try_transition(
            &self.id,
            unit,
            consumer_id,
            ConsumerState::Active,
            ConsumerState::Finished,
            TransitionGuard::Unconditional,
        )?;

        if outcome.is_applied() {
            info!(consumer_id = %consumer_id, "consumer finished");
            metrics::record_finished();
            Ok(true)
        } else {
            debug!(consumer_id = %consumer_id, ?outcome, "nothing to finish");
            Ok(false)
        }
    }

    /// Lists the BLOCKED consumers that could be admitted right now.
    ///
    /// A pure read: FIFO stops at the first consumer that does not fit, ASAP
    /// skips it and keeps scanning. Callers still have to unblock each one.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry fails.
    pub fn runnable_consumers<R>(
        &self,
        unit: &ConstraintUnit,
        registry: &R,
    ) -> Result<RunnableConsumers>
    where
        R: ConstraintRegistry + ?Sized,
    {
        let snapshot = registry.load_consumers(&self.id, unit)?;
        let used_permits = active_usage(&snapshot.consumers);
        let consumer_ids =
            self.spec
                .strategy()
                .scan(used_permits, self.spec.limits(), snapshot.blocked());

        Ok(RunnableConsumers {
            consumer_ids,
            used_permits,
        })
    }

    /// Reports the ACTIVE consumers of every unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry fails.
    pub fn usage<R>(&self, registry: &R) -> Result<ConstraintUsage>
    where
        R: ConstraintRegistry + ?Sized,
    {
        let mut active_scopes = Vec::new();
        for unit in registry.units(&self.id)? {
            let snapshot = registry.load_consumers(&self.id, &unit)?;
            active_scopes.extend(
                snapshot
                    .active()
                    .map(|consumer| ActiveScope::from_consumer(&unit, consumer)),
            );
        }

        Ok(ConstraintUsage {
            constraint_id: self.id.clone(),
            limits: self.spec.limits(),
            active_scopes,
        })
    }
}
