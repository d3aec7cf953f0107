//! Many callers racing on one unit.
//!
//! Threads stand in for independent processes sharing a registry: nothing
//! but the registry's conditional writes keeps them apart.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use bulwark_constraint::consumer::active_usage;
use bulwark_constraint::registry::ConstraintRegistry;
use bulwark_constraint::registry::memory::InMemoryRegistry;
use bulwark_constraint::{ConstraintDriver, ConsumerState, Strategy};
use bulwark_test_utils::{
    ConstraintFixture, ContendedRegistry, RegistryFaults, assert_capacity_invariant,
};

const DEADLINE: Duration = Duration::from_secs(20);

fn register_retrying<R: ConstraintRegistry>(fx: &ConstraintFixture<R>, id: &str, permits: u32) {
    let started = Instant::now();
    loop {
        match fx.try_register(id, permits) {
            Ok(_) => return,
            Err(e) if e.is_retryable() => {
                assert!(started.elapsed() < DEADLINE, "could not register {id}: {e}");
                thread::yield_now();
            }
            Err(e) => panic!("registration of {id} failed: {e}"),
        }
    }
}

/// Drives `ids` to FINISHED, helping the shared driver along while waiting.
fn run_to_completion<R: ConstraintRegistry>(
    fx: &ConstraintFixture<R>,
    driver: &ConstraintDriver<R>,
    ids: &[String],
) {
    let started = Instant::now();
    let mut pending: Vec<&String> = ids.iter().collect();

    while !pending.is_empty() {
        assert!(
            started.elapsed() < DEADLINE,
            "consumers never finished: {pending:?}"
        );

        pending.retain(|id| match fx.state_of(id) {
            Some(ConsumerState::Active) => {
                fx.finish(id);
                true
            }
            Some(ConsumerState::Finished) => false,
            Some(ConsumerState::Blocked) => {
                fx.unblock(id);
                true
            }
            None => panic!("consumer {id} vanished"),
        });

        // Transient stale snapshots only end the pass early.
        let _ = driver.tick();
        thread::yield_now();
    }
}

fn permits_for(i: usize, limits: u32) -> u32 {
    u32::try_from(i % limits as usize).unwrap() + 1
}

fn liveness(strategy: Strategy) {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 6;
    const LIMITS: u32 = 3;

    let registry = Arc::new(InMemoryRegistry::new());
    let fx = ConstraintFixture::with_registry(Arc::clone(&registry), strategy, LIMITS);
    let driver = ConstraintDriver::new(Arc::clone(&registry));

    thread::scope(|s| {
        for t in 0..THREADS {
            let fx = &fx;
            let driver = &driver;
            s.spawn(move || {
                let ids: Vec<String> = (0..PER_THREAD).map(|i| format!("t{t}-c{i}")).collect();
                for (i, id) in ids.iter().enumerate() {
                    register_retrying(fx, id, permits_for(t + i, LIMITS));
                }
                run_to_completion(fx, driver, &ids);
            });
        }
    });

    let snapshot = registry
        .load_consumers(fx.constraint.id(), &fx.unit)
        .unwrap();
    assert_eq!(snapshot.consumers.len(), THREADS * PER_THREAD);
    assert!(
        snapshot
            .consumers
            .iter()
            .all(|c| c.state == ConsumerState::Finished)
    );
}

#[test]
fn every_fifo_consumer_eventually_finishes() {
    liveness(Strategy::Fifo);
}

#[test]
fn every_asap_consumer_eventually_finishes() {
    liveness(Strategy::Asap);
}

fn capacity_under_contention(strategy: Strategy, faults: RegistryFaults, seed: u64) {
    const THREADS: usize = 6;
    const PER_THREAD: usize = 10;
    const LIMITS: u32 = 5;

    let registry = Arc::new(
        ContendedRegistry::with_seed(InMemoryRegistry::new(), seed).with_faults(faults),
    );
    let fx = ConstraintFixture::with_registry(Arc::clone(&registry), strategy, LIMITS);
    let driver = ConstraintDriver::new(Arc::clone(&registry));
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        // Observer: the invariant must hold at every point it can see.
        let observer = s.spawn(|| {
            let mut observations = 0_u64;
            while !done.load(Ordering::Acquire) {
                let snapshot = registry
                    .inner()
                    .load_consumers(fx.constraint.id(), &fx.unit)
                    .unwrap();
                let used = active_usage(&snapshot.consumers);
                assert!(used <= u64::from(LIMITS), "observed {used} ACTIVE permits");
                observations += 1;
            }
            observations
        });

        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let fx = &fx;
                let driver = &driver;
                s.spawn(move || {
                    let ids: Vec<String> =
                        (0..PER_THREAD).map(|i| format!("t{t}-c{i}")).collect();
                    for (i, id) in ids.iter().enumerate() {
                        register_retrying(fx, id, permits_for(t * PER_THREAD + i, LIMITS));
                    }
                    run_to_completion(fx, driver, &ids);
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        done.store(true, Ordering::Release);
        assert!(observer.join().unwrap() > 0);
    });

    assert_capacity_invariant(&fx);
}

#[test]
fn capacity_holds_for_fifo_under_racing_callers() {
    capacity_under_contention(Strategy::Fifo, RegistryFaults::no_faults(), 1);
}

#[test]
fn capacity_holds_for_asap_under_racing_callers() {
    capacity_under_contention(Strategy::Asap, RegistryFaults::no_faults(), 2);
}

#[test]
fn capacity_holds_with_injected_conflicts() {
    capacity_under_contention(Strategy::Asap, RegistryFaults::contended(), 3);
    capacity_under_contention(Strategy::Fifo, RegistryFaults::contended(), 4);
}
