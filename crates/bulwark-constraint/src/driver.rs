//! Background pass that admits blocked consumers once capacity frees up.
//!
//! Registration and finishing never admit anyone else on their own; the
//! driver walks every constraint that still has BLOCKED consumers and
//! unblocks each unit's runnable set in scan order.
//!
//! When a holding scope ends, [`ConstraintDriver::release_scope`] finishes
//! the consumers it still holds so the following tick can hand their
//! permits on.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, warn};

use bulwark_core::observability::driver_span;
use bulwark_core::{ConstraintId, EngineConfig};

use crate::constraint::{Constraint, RetryPolicy};
use crate::error::{Error, Result};
use crate::metrics::{self, TickTimer};
use crate::registry::ConstraintRegistry;

/// Counts from one driver pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverTick {
    /// Constraints with blocked consumers that were visited.
    pub constraints: usize,
    /// Units visited across those constraints.
    pub units: usize,
    /// Consumers moved from BLOCKED to ACTIVE.
    pub unblocked: usize,
}

/// Periodically unblocks runnable consumers across a registry.
pub struct ConstraintDriver<R: ConstraintRegistry + ?Sized> {
    registry: Arc<R>,
    retry: RetryPolicy,
    ticks: AtomicU64,
}

impl<R: ConstraintRegistry + ?Sized> ConstraintDriver<R> {
    /// Creates a driver with the default retry policy.
    #[must_use]
    pub fn new(registry: Arc<R>) -> Self {
        Self {
            registry,
            retry: RetryPolicy::default(),
            ticks: AtomicU64::new(0),
        }
    }

    /// Creates a driver whose retry bounds come from `config`.
    #[must_use]
    pub fn from_config(registry: Arc<R>, config: &EngineConfig) -> Self {
        Self::new(registry).with_retry_policy(RetryPolicy::from(config))
    }

    /// Replaces the retry policy applied to loaded constraints.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the registry this driver works on.
    #[must_use]
    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    /// Runs one pass over every constraint with blocked consumers.
    ///
    /// Within a unit, candidates are unblocked in scan order and the unit is
    /// left at the first one that no longer fits. Constraints that disappear
    /// between listing and loading are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry fails; the pass stops there.
    pub fn tick(&self) -> Result<DriverTick> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let _guard = driver_span(tick).entered();
        let registry = self.registry.as_ref();
        let mut report = DriverTick::default();

        for constraint_id in registry.blocked_constraints()? {
            let Some(constraint) = Constraint::load(&constraint_id, registry)? else {
                warn!(constraint_id = %constraint_id, "blocked constraint vanished, skipping");
                continue;
            };
            let constraint = constraint.with_retry_policy(self.retry);
            report.constraints += 1;

            for unit in registry.units(&constraint_id)? {
                report.units += 1;
                let runnable = constraint.runnable_consumers(&unit, registry)?;
                for consumer_id in &runnable.consumer_ids {
                    if !constraint.consumer_unblocked(&unit, consumer_id, None, registry)? {
                        break;
                    }
                    report.unblocked += 1;
                }
            }
        }

        debug!(
            constraints = report.constraints,
            units = report.units,
            unblocked = report.unblocked,
            "driver pass complete"
        );
        Ok(report)
    }

    /// Finishes every ACTIVE consumer held by `scope`.
    ///
    /// Returns the IDs of the constraints that got permits back, sorted.
    /// Consumers finished concurrently by someone else are skipped, as are
    /// constraints that vanished. Waiters are admitted by the next
    /// [`ConstraintDriver::tick`], not here.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry fails; consumers finished before the
    /// failure stay finished.
    pub fn release_scope(&self, scope: &serde_json::Value) -> Result<Vec<ConstraintId>> {
        let _guard = tracing::info_span!("release_scope", scope = %scope).entered();
        let registry = self.registry.as_ref();
        let mut loaded: BTreeMap<ConstraintId, Option<Constraint>> = BTreeMap::new();
        let mut released = BTreeSet::new();
        let mut finished = 0_usize;

        for held in registry.active_in_scope(scope)? {
            let constraint = match loaded.entry(held.constraint_id.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    entry.insert(Constraint::load(&held.constraint_id, registry)?)
                }
            };
            let Some(constraint) = constraint else {
                warn!(constraint_id = %held.constraint_id, "scoped constraint vanished, skipping");
                continue;
            };

            if constraint.consumer_finished(&held.unit, &held.consumer_id, registry)? {
                finished += 1;
                released.insert(held.constraint_id);
            }
        }

        if finished > 0 {
            info!(finished, constraints = released.len(), "holding scope released");
        }
        Ok(released.into_iter().collect())
    }

    /// Ticks every `interval` until `shutdown` resolves.
    ///
    /// A failed pass is logged and counted; the loop keeps going.
    ///
    /// # Errors
    ///
    /// Returns an error if `interval` is zero.
    pub async fn run(&self, interval: Duration, shutdown: impl Future<Output = ()>) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::from(bulwark_core::Error::InvalidInput(
                "driver interval must be positive".to_string(),
            )));
        }

        metrics::describe_metrics();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_ms = interval.as_millis(), "constraint driver started");

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    let timer = TickTimer::start();
                    match self.tick() {
                        Ok(report) => {
                            if report.unblocked > 0 {
                                info!(unblocked = report.unblocked, "driver admitted consumers");
                            }
                            timer.finish(true);
                        }
                        Err(e) => {
                            error!(error = %e, "driver pass failed");
                            timer.finish(false);
                        }
                    }
                }
            }
        }

        info!("constraint driver stopped");
        Ok(())
    }

    /// Like [`ConstraintDriver::run`], with the interval from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured interval is zero.
    pub async fn run_with_config(
        &self,
        config: &EngineConfig,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        self.run(config.driver_interval(), shutdown)
            .instrument(tracing::info_span!("constraint_driver_loop"))
            .await
    }
}
