//! Pre-built test fixtures for common test scenarios.
//!
//! Provides a constraint wired to a registry and one unit, with shorthand
//! operations that take plain string IDs.

use std::sync::Arc;

use bulwark_constraint::registry::ConstraintRegistry;
use bulwark_constraint::registry::memory::InMemoryRegistry;
use bulwark_constraint::{
    Constraint, ConsumerContext, ConsumerState, Result, RunnableConsumers, Spec, Strategy,
};
use bulwark_core::{ConstraintId, ConstraintUnit, ConsumerId};

/// Unit used by fixtures unless another one is given.
pub const DEFAULT_UNIT: &str = "production";

/// A created constraint, its registry and a unit to work in.
pub struct ConstraintFixture<R: ConstraintRegistry = InMemoryRegistry> {
    /// Shared registry.
    pub registry: Arc<R>,
    /// The constraint under test.
    pub constraint: Constraint,
    /// The unit operations default to.
    pub unit: ConstraintUnit,
}

impl ConstraintFixture<InMemoryRegistry> {
    /// FIFO constraint with the given capacity on a fresh in-memory registry.
    #[must_use]
    pub fn fifo(limits: u32) -> Self {
        Self::with_registry(Arc::new(InMemoryRegistry::new()), Strategy::Fifo, limits)
    }

    /// ASAP constraint with the given capacity on a fresh in-memory registry.
    #[must_use]
    pub fn asap(limits: u32) -> Self {
        Self::with_registry(Arc::new(InMemoryRegistry::new()), Strategy::Asap, limits)
    }
}

impl<R: ConstraintRegistry> ConstraintFixture<R> {
    /// Creates a uniquely named constraint on `registry`.
    #[must_use]
    pub fn with_registry(registry: Arc<R>, strategy: Strategy, limits: u32) -> Self {
        let id = ConstraintId::new(format!("test-constraint-{}", ConsumerId::generate()))
            .expect("valid constraint id");
        let spec = Spec::new(strategy, limits).expect("valid spec");
        let constraint =
            Constraint::create(id, spec, registry.as_ref()).expect("constraint created");
        Self {
            registry,
            constraint,
            unit: ConstraintUnit::new_unchecked(DEFAULT_UNIT),
        }
    }

    /// Returns a fixture for another unit of the same constraint.
    #[must_use]
    pub fn in_unit(&self, unit: &str) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            constraint: self.constraint.clone(),
            unit: ConstraintUnit::new_unchecked(unit),
        }
    }

    /// Registers a consumer with an empty context.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub fn try_register(&self, id: &str, permits: u32) -> Result<ConsumerState> {
        self.try_register_with(id, permits, ConsumerContext::new())
    }

    /// Registers a consumer with the given context.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub fn try_register_with(
        &self,
        id: &str,
        permits: u32,
        context: ConsumerContext,
    ) -> Result<ConsumerState> {
        self.constraint.register_consumer(
            &self.unit,
            ConsumerId::new_unchecked(id),
            permits,
            context,
            self.registry.as_ref(),
        )
    }

    /// Registers a consumer, panicking on error.
    pub fn register(&self, id: &str, permits: u32) -> ConsumerState {
        self.try_register(id, permits).expect("registration succeeds")
    }

    /// Unblocks a consumer.
    pub fn unblock(&self, id: &str) -> bool {
        self.constraint
            .consumer_unblocked(
                &self.unit,
                &ConsumerId::new_unchecked(id),
                None,
                self.registry.as_ref(),
            )
            .expect("unblock succeeds")
    }

    /// Finishes a consumer.
    pub fn finish(&self, id: &str) -> bool {
        self.constraint
            .consumer_finished(
                &self.unit,
                &ConsumerId::new_unchecked(id),
                self.registry.as_ref(),
            )
            .expect("finish succeeds")
    }

    /// Returns the runnable set of the fixture's unit.
    pub fn runnable(&self) -> RunnableConsumers {
        self.constraint
            .runnable_consumers(&self.unit, self.registry.as_ref())
            .expect("runnable read succeeds")
    }

    /// Returns the runnable IDs as plain strings, in scan order.
    pub fn runnable_ids(&self) -> Vec<String> {
        self.runnable()
            .consumer_ids
            .iter()
            .map(|id| id.as_str().to_string())
            .collect()
    }

    /// Returns a consumer's state, or `None` if it was never registered.
    pub fn state_of(&self, id: &str) -> Option<ConsumerState> {
        self.registry
            .load_consumers(self.constraint.id(), &self.unit)
            .expect("consumer read succeeds")
            .find(&ConsumerId::new_unchecked(id))
            .map(|consumer| consumer.state)
    }

    /// Returns the permits held by ACTIVE consumers of the fixture's unit.
    pub fn used_permits(&self) -> u64 {
        self.runnable().used_permits
    }
}

/// Builds a context from key/value pairs.
pub fn context<I, K>(pairs: I) -> ConsumerContext
where
    I: IntoIterator<Item = (K, serde_json::Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Builds a context carrying a holding scope under `key`.
pub fn scope_context(key: &str, scope: &str) -> ConsumerContext {
    context([(key, serde_json::Value::String(scope.to_string()))])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_get_unique_constraints() {
        let a = ConstraintFixture::fifo(1);
        let b = ConstraintFixture::fifo(1);
        assert_ne!(a.constraint.id(), b.constraint.id());
    }

    #[test]
    fn in_unit_shares_constraint_and_registry() {
        let fx = ConstraintFixture::asap(1);
        assert_eq!(fx.register("a", 1), ConsumerState::Active);
        let staging = fx.in_unit("staging");
        assert_eq!(staging.register("a", 1), ConsumerState::Active);
        assert_eq!(fx.state_of("a"), Some(ConsumerState::Active));
        assert_eq!(staging.used_permits(), 1);
    }

    #[test]
    fn scope_context_shape() {
        let ctx = scope_context("execution", "exec-1");
        assert_eq!(ctx.get("execution"), Some(&serde_json::json!("exec-1")));
    }
}
