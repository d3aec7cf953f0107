//! Admission metrics.
//!
//! Recorded through the `metrics` crate facade; installing an exporter is up
//! to the embedding service.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `bulwark_consumers_registered_total` | Counter | `strategy`, `state` | Registrations by decided state |
//! | `bulwark_register_conflicts_total` | Counter | `strategy` | Optimistic-retry conflicts during registration |
//! | `bulwark_register_failures_total` | Counter | `reason` | Registrations that gave up or were rejected |
//! | `bulwark_consumers_unblocked_total` | Counter | `strategy` | BLOCKED to ACTIVE transitions |
//! | `bulwark_consumers_finished_total` | Counter | - | ACTIVE to FINISHED transitions |
//! | `bulwark_driver_ticks_total` | Counter | `result` | Driver passes by outcome |
//! | `bulwark_driver_tick_duration_seconds` | Histogram | - | Driver pass duration |

use std::sync::Once;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::consumer::ConsumerState;
use crate::strategy::Strategy;

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Registrations by decided state.
    pub const CONSUMERS_REGISTERED_TOTAL: &str = "bulwark_consumers_registered_total";
    /// Counter: Registration conflicts that triggered a retry.
    pub const REGISTER_CONFLICTS_TOTAL: &str = "bulwark_register_conflicts_total";
    /// Counter: Registrations that failed.
    pub const REGISTER_FAILURES_TOTAL: &str = "bulwark_register_failures_total";
    /// Counter: Consumers moved from BLOCKED to ACTIVE.
    pub const CONSUMERS_UNBLOCKED_TOTAL: &str = "bulwark_consumers_unblocked_total";
    /// Counter: Consumers moved from ACTIVE to FINISHED.
    pub const CONSUMERS_FINISHED_TOTAL: &str = "bulwark_consumers_finished_total";
    /// Counter: Driver passes by outcome.
    pub const DRIVER_TICKS_TOTAL: &str = "bulwark_driver_ticks_total";
    /// Histogram: Driver pass duration in seconds.
    pub const DRIVER_TICK_DURATION_SECONDS: &str = "bulwark_driver_tick_duration_seconds";
}

/// Label keys used across metrics.
pub mod labels {
    /// Admission strategy (fifo, asap).
    pub const STRATEGY: &str = "strategy";
    /// Consumer state (active, blocked).
    pub const STATE: &str = "state";
    /// Failure reason (conflicts, duplicate, permanently_blocked, invalid_permits).
    pub const REASON: &str = "reason";
    /// Outcome (success, error).
    pub const RESULT: &str = "result";
}

static DESCRIBE: Once = Once::new();

/// Registers metric descriptions with the installed recorder.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn describe_metrics() {
    DESCRIBE.call_once(|| {
        describe_counter!(
            names::CONSUMERS_REGISTERED_TOTAL,
            "Consumers registered, by strategy and decided state"
        );
        describe_counter!(
            names::REGISTER_CONFLICTS_TOTAL,
            "Registry conflicts that forced a registration retry"
        );
        describe_counter!(
            names::REGISTER_FAILURES_TOTAL,
            "Registrations that failed, by reason"
        );
        describe_counter!(
            names::CONSUMERS_UNBLOCKED_TOTAL,
            "Blocked consumers admitted"
        );
        describe_counter!(
            names::CONSUMERS_FINISHED_TOTAL,
            "Active consumers that released their permits"
        );
        describe_counter!(names::DRIVER_TICKS_TOTAL, "Driver loop passes by outcome");
        describe_histogram!(
            names::DRIVER_TICK_DURATION_SECONDS,
            "Duration of driver loop passes in seconds"
        );
    });
}

/// Records a successful registration.
pub fn record_registration(strategy: Strategy, state: ConsumerState) {
    counter!(
        names::CONSUMERS_REGISTERED_TOTAL,
        labels::STRATEGY => strategy.as_label(),
        labels::STATE => state.as_label()
    )
    .increment(1);
}

/// Records a registration conflict that will be retried.
pub fn record_register_conflict(strategy: Strategy) {
    counter!(names::REGISTER_CONFLICTS_TOTAL, labels::STRATEGY => strategy.as_label())
        .increment(1);
}

/// Records a failed registration.
pub fn record_register_failure(reason: &'static str) {
    counter!(names::REGISTER_FAILURES_TOTAL, labels::REASON => reason).increment(1);
}

/// Records a consumer admitted from the queue.
pub fn record_unblocked(strategy: Strategy) {
    counter!(names::CONSUMERS_UNBLOCKED_TOTAL, labels::STRATEGY => strategy.as_label())
        .increment(1);
}

/// Records a consumer that released its permits.
pub fn record_finished() {
    counter!(names::CONSUMERS_FINISHED_TOTAL).increment(1);
}

/// RAII-style timer for one driver pass.
#[derive(Debug)]
pub struct TickTimer {
    start: Instant,
}

impl TickTimer {
    /// Starts timing a driver pass.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Stops the timer and records the outcome.
    pub fn finish(self, success: bool) {
        let result = if success { "success" } else { "error" };
        histogram!(names::DRIVER_TICK_DURATION_SECONDS).record(self.start.elapsed().as_secs_f64());
        counter!(names::DRIVER_TICKS_TOTAL, labels::RESULT => result).increment(1);
    }
}
