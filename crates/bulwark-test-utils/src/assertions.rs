//! Custom assertion helpers for integration tests.

use bulwark_constraint::ConsumerState;
use bulwark_constraint::consumer::active_usage;
use bulwark_constraint::registry::ConstraintRegistry;

use crate::fixtures::ConstraintFixture;

/// Asserts that ACTIVE permits in the fixture's unit stay within capacity.
///
/// # Panics
///
/// Panics if the sum of ACTIVE permits exceeds the constraint's limits.
pub fn assert_capacity_invariant<R: ConstraintRegistry>(fx: &ConstraintFixture<R>) {
    let snapshot = fx
        .registry
        .load_consumers(fx.constraint.id(), &fx.unit)
        .expect("consumer read succeeds");
    let used = active_usage(&snapshot.consumers);
    let limits = u64::from(fx.constraint.spec().limits());
    assert!(
        used <= limits,
        "ACTIVE permits {used} exceed limits {limits} in unit {}: {:?}",
        fx.unit,
        snapshot.consumers
    );
}

/// Asserts that registry-assigned order strictly increases in the fixture's unit.
///
/// # Panics
///
/// Panics if two consumers share an order or appear out of order.
pub fn assert_order_strictly_increasing<R: ConstraintRegistry>(fx: &ConstraintFixture<R>) {
    let snapshot = fx
        .registry
        .load_consumers(fx.constraint.id(), &fx.unit)
        .expect("consumer read succeeds");
    for pair in snapshot.consumers.windows(2) {
        assert!(
            pair[0].order < pair[1].order,
            "order not strictly increasing: {} ({}) then {} ({})",
            pair[0].id,
            pair[0].order,
            pair[1].id,
            pair[1].order
        );
    }
}

/// Asserts that a consumer is in the expected state.
///
/// # Panics
///
/// Panics if the consumer is missing or in another state.
pub fn assert_state<R: ConstraintRegistry>(
    fx: &ConstraintFixture<R>,
    id: &str,
    expected: ConsumerState,
) {
    let actual = fx.state_of(id);
    assert_eq!(
        actual,
        Some(expected),
        "Expected consumer {id} to be {expected}, but was {actual:?}"
    );
}
