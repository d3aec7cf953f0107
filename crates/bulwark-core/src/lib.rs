//! # bulwark-core
//!
//! Core abstractions for the Bulwark admission-control engine.
//!
//! This crate provides the foundational types shared by every Bulwark component:
//!
//! - **Identifiers**: Strongly-typed IDs for constraints, units, and consumers
//! - **Error Types**: Shared error definitions and result types
//! - **Configuration**: Environment-driven engine tuning
//! - **Observability**: Logging initialization and span helpers
//!
//! ## Crate Boundary
//!
//! `bulwark-core` carries no admission logic. The engine itself lives in
//! `bulwark-constraint` and depends on the primitives defined here.
//!
//! ## Example
//!
//! ```rust
//! use bulwark_core::prelude::*;
//!
//! let constraint = ConstraintId::new("max-concurrent-per-env").unwrap();
//! let unit = ConstraintUnit::new("production").unwrap();
//! let consumer = ConsumerId::generate();
//!
//! assert_eq!(constraint.as_str(), "max-concurrent-per-env");
//! assert_eq!(unit.as_str(), "production");
//! assert!(!consumer.as_str().is_empty());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod id;
pub mod observability;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use bulwark_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::error::{Error, Result};
    pub use crate::id::{ConstraintId, ConstraintUnit, ConsumerId};
    pub use crate::observability::{LogFormat, init_logging};
}

// Re-export key types at crate root for ergonomics
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use id::{ConstraintId, ConstraintUnit, ConsumerId};
pub use observability::{LogFormat, init_logging};
