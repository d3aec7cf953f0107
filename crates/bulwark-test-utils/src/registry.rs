//! Fault-injecting registry wrapper.
//!
//! [`ContendedRegistry`] forwards every call to an inner registry, but can
//! pretend another writer got there first: inserts report a conflict,
//! snapshot-guarded transitions report a stale snapshot, and reads fail
//! outright. Decisions come from a seeded RNG, so a failing test replays
//! exactly with the same seed.
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = ContendedRegistry::with_seed(InMemoryRegistry::new(), 42)
//!     .with_faults(RegistryFaults::contended());
//! ```

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use bulwark_constraint::consumer::{Consumer, ConsumerState, NewConsumer};
use bulwark_constraint::error::{Error, Result};
use bulwark_constraint::registry::{
    ConstraintRegistry, ConsumerSnapshot, InsertOutcome, SaveOutcome, ScopedConsumer,
    SnapshotToken, TransitionGuard, TransitionOutcome,
};
use bulwark_constraint::Constraint;
use bulwark_core::{ConstraintId, ConstraintUnit, ConsumerId};

/// Probabilities of injected faults (0.0 - 1.0).
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryFaults {
    /// Probability that a conditional insert reports a conflict.
    pub conflict_rate: f64,
    /// Probability that a snapshot-guarded transition reports a stale snapshot.
    pub stale_rate: f64,
    /// Probability that loading a unit's consumers fails.
    pub read_failure_rate: f64,
}

impl RegistryFaults {
    /// No faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Simulates many writers racing on the same units.
    #[must_use]
    pub fn contended() -> Self {
        Self {
            conflict_rate: 0.3,
            stale_rate: 0.3,
            ..Default::default()
        }
    }

    /// Every conditional write loses.
    #[must_use]
    pub fn always_conflict() -> Self {
        Self {
            conflict_rate: 1.0,
            stale_rate: 1.0,
            ..Default::default()
        }
    }

    /// Every read fails.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            read_failure_rate: 1.0,
            ..Default::default()
        }
    }
}

/// A registry that injects contention into an inner registry.
pub struct ContendedRegistry<R> {
    inner: R,
    seed: u64,
    rng: Mutex<StdRng>,
    faults: Mutex<RegistryFaults>,
    injected_conflicts: AtomicU64,
    injected_stale: AtomicU64,
    injected_read_failures: AtomicU64,
}

impl<R: ConstraintRegistry> ContendedRegistry<R> {
    /// Wraps `inner` with a deterministic RNG and no faults configured.
    #[must_use]
    pub fn with_seed(inner: R, seed: u64) -> Self {
        Self {
            inner,
            seed,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            faults: Mutex::new(RegistryFaults::default()),
            injected_conflicts: AtomicU64::new(0),
            injected_stale: AtomicU64::new(0),
            injected_read_failures: AtomicU64::new(0),
        }
    }

    /// Wraps `inner` with a random seed.
    ///
    /// The seed is printed to stderr for reproducibility.
    #[must_use]
    pub fn random(inner: R) -> Self {
        let seed = rand::random();
        eprintln!("Registry fault seed: {seed}");
        Self::with_seed(inner, seed)
    }

    /// Sets the fault probabilities.
    #[must_use]
    pub fn with_faults(self, faults: RegistryFaults) -> Self {
        self.configure_faults(faults);
        self
    }

    /// Replaces the fault probabilities.
    pub fn configure_faults(&self, faults: RegistryFaults) {
        *self.faults.lock().expect("lock poisoned") = faults;
    }

    /// Returns the seed used for this registry.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the wrapped registry.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Number of inserts that were turned into conflicts.
    pub fn injected_conflicts(&self) -> u64 {
        self.injected_conflicts.load(Ordering::Relaxed)
    }

    /// Number of transitions that were turned into stale snapshots.
    pub fn injected_stale(&self) -> u64 {
        self.injected_stale.load(Ordering::Relaxed)
    }

    /// Number of reads that were failed.
    pub fn injected_read_failures(&self) -> u64 {
        self.injected_read_failures.load(Ordering::Relaxed)
    }

    fn should_fail(&self, pick: impl FnOnce(&RegistryFaults) -> f64) -> bool {
        let probability = pick(&self.faults.lock().expect("lock poisoned"));
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.rng.lock().expect("lock poisoned").gen_bool(probability)
    }
}

impl<R: ConstraintRegistry> ConstraintRegistry for ContendedRegistry<R> {
    fn save(&self, constraint: &Constraint) -> Result<SaveOutcome> {
        self.inner.save(constraint)
    }

    fn load(&self, id: &ConstraintId) -> Result<Option<Constraint>> {
        self.inner.load(id)
    }

    fn load_consumers(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
    ) -> Result<ConsumerSnapshot> {
        if self.should_fail(|f| f.read_failure_rate) {
            self.injected_read_failures.fetch_add(1, Ordering::Relaxed);
            return Err(Error::storage("injected read failure"));
        }
        self.inner.load_consumers(id, unit)
    }

    fn try_insert_consumer(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
        consumer: NewConsumer,
        expected: SnapshotToken,
    ) -> Result<InsertOutcome> {
        if self.should_fail(|f| f.conflict_rate) {
            self.injected_conflicts.fetch_add(1, Ordering::Relaxed);
            return Ok(InsertOutcome::Conflict {
                current: SnapshotToken::new(expected.version() + 1),
            });
        }
        self.inner.try_insert_consumer(id, unit, consumer, expected)
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
        if let TransitionGuard::Snapshot(expected) = guard {
            if self.should_fail(|f| f.stale_rate) {
                self.injected_stale.fetch_add(1, Ordering::Relaxed);
                return Ok(TransitionOutcome::Stale {
                    current: SnapshotToken::new(expected.version() + 1),
                });
            }
        }
        self.inner
            .try_transition(id, unit, consumer_id, from, to, guard)
    }

    fn blocked_constraints(&self) -> Result<Vec<ConstraintId>> {
        self.inner.blocked_constraints()
    }

    fn units(&self, id: &ConstraintId) -> Result<Vec<ConstraintUnit>> {
        self.inner.units(id)
    }

    fn overlapping_scope(&self, holder: &Consumer, candidate: &NewConsumer) -> bool {
        self.inner.overlapping_scope(holder, candidate)
    }

    fn active_in_scope(&self, scope: &serde_json::Value) -> Result<Vec<ScopedConsumer>> {
        if self.should_fail(|f| f.read_failure_rate) {
            self.injected_read_failures.fetch_add(1, Ordering::Relaxed);
            return Err(Error::storage("injected read failure"));
        }
        self.inner.active_in_scope(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_constraint::registry::memory::InMemoryRegistry;

    #[test]
    fn no_faults_passes_through() {
        let registry = ContendedRegistry::with_seed(InMemoryRegistry::new(), 7);
        for _ in 0..100 {
            assert!(!registry.should_fail(|f| f.conflict_rate));
        }
        assert_eq!(registry.injected_conflicts(), 0);
    }

    #[test]
    fn same_seed_same_decisions() {
        let faults = RegistryFaults {
            conflict_rate: 0.5,
            ..Default::default()
        };
        let a = ContendedRegistry::with_seed(InMemoryRegistry::new(), 42).with_faults(faults);
        let b = ContendedRegistry::with_seed(InMemoryRegistry::new(), 42).with_faults(faults);

        let left: Vec<bool> = (0..64).map(|_| a.should_fail(|f| f.conflict_rate)).collect();
        let right: Vec<bool> = (0..64).map(|_| b.should_fail(|f| f.conflict_rate)).collect();
        assert_eq!(left, right);
        assert!(left.iter().any(|x| *x));
        assert!(left.iter().any(|x| !*x));
    }

    #[test]
    fn unavailable_fails_reads() {
        let registry = ContendedRegistry::with_seed(InMemoryRegistry::new(), 1)
            .with_faults(RegistryFaults::unavailable());
        let result = registry.load_consumers(
            &ConstraintId::new_unchecked("c"),
            &ConstraintUnit::new_unchecked("u"),
        );
        assert!(result.is_err());
        assert_eq!(registry.injected_read_failures(), 1);
    }
}
