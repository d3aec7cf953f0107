//! Shared test utilities for Bulwark integration tests.
//!
//! This crate provides:
//! - [`ContendedRegistry`]: a registry wrapper that injects conflicts and
//!   storage failures from a seeded RNG
//! - [`ConstraintFixture`]: a constraint, unit and registry wired together
//! - Custom assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use bulwark_test_utils::{ConstraintFixture, assert_capacity_invariant};
//!
//! #[test]
//! fn test_example() {
//!     let fx = ConstraintFixture::fifo(2);
//!     fx.register("a", 1);
//!     assert_capacity_invariant(&fx);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod registry;

pub use assertions::*;
pub use fixtures::*;
pub use registry::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("bulwark_constraint=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
