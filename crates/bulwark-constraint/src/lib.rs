//! # bulwark-constraint
//!
//! Capacity-bounded admission control for shared resources.
//!
//! A constraint caps how many permits its consumers may hold at once in each
//! unit (for example, "at most 2 deployments per environment"). Requests that
//! do not fit are queued as BLOCKED and admitted later by a driver pass.
//!
//! ## Core Concepts
//!
//! - **Spec**: capacity (`limits`) plus a [`Strategy`] (FIFO or ASAP)
//! - **Unit**: an independent counter under one constraint; capacity and
//!   strategy are shared, usage is not
//! - **Consumer**: one admission request, ACTIVE, BLOCKED or FINISHED
//! - **Registry**: the store every process shares; all atomicity lives here
//!
//! ## Guarantees
//!
//! - **Bounded**: ACTIVE permits in a unit never exceed `limits`, even with
//!   many processes racing on one registry
//! - **Ordered**: FIFO never lets a later request overtake a blocked one
//! - **Forward-only**: consumers move BLOCKED to ACTIVE to FINISHED and never back
//!
//! ## Example
//!
//! ```rust
//! use bulwark_constraint::prelude::*;
//! use bulwark_constraint::registry::memory::InMemoryRegistry;
//!
//! let registry = InMemoryRegistry::new();
//! let constraint = Constraint::create(
//!     ConstraintId::new("builds").unwrap(),
//!     Spec::new(Strategy::Asap, 10).unwrap(),
//!     &registry,
//! )
//! .unwrap();
//! let unit = ConstraintUnit::new("linux-runners").unwrap();
//!
//! let big = ConsumerId::new("big").unwrap();
//! constraint.register_consumer(&unit, big.clone(), 8, ConsumerContext::new(), &registry).unwrap();
//! let state = constraint
//!     .register_consumer(&unit, ConsumerId::new("huge").unwrap(), 5, ConsumerContext::new(), &registry)
//!     .unwrap();
//! assert_eq!(state, ConsumerState::Blocked);
//!
//! constraint.consumer_finished(&unit, &big, &registry).unwrap();
//! let runnable = constraint.runnable_consumers(&unit, &registry).unwrap();
//! assert_eq!(runnable.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod constraint;
pub mod consumer;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod runnable;
pub mod spec;
pub mod strategy;
pub mod usage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::constraint::{Constraint, RetryPolicy};
    pub use crate::consumer::{Consumer, ConsumerContext, ConsumerState};
    pub use crate::driver::{ConstraintDriver, DriverTick};
    pub use crate::error::{Error, Result};
    pub use crate::registry::ConstraintRegistry;
    pub use crate::runnable::RunnableConsumers;
    pub use crate::spec::Spec;
    pub use crate::strategy::Strategy;
    pub use crate::usage::{ActiveScope, ConstraintUsage};
    pub use bulwark_core::{ConstraintId, ConstraintUnit, ConsumerId};
}

pub use constraint::{Constraint, RetryPolicy};
pub use consumer::{Consumer, ConsumerContext, ConsumerState};
pub use driver::{ConstraintDriver, DriverTick};
pub use error::{Error, Result};
pub use registry::ConstraintRegistry;
pub use runnable::RunnableConsumers;
pub use spec::Spec;
pub use strategy::Strategy;
pub use usage::{ActiveScope, ConstraintUsage};
