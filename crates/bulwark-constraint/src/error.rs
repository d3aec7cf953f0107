//! Error types for the admission engine.
//!
//! Only genuine failures are errors. Expected no-ops (unblocking a consumer
//! that is no longer blocked, finishing one that already finished) are
//! reported as `false` by the engine, never as an [`Error`].

use bulwark_core::{ConstraintId, ConstraintUnit, ConsumerId};

use crate::consumer::ConsumerState;

/// The result type used throughout bulwark-constraint.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in admission operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested permits are outside `[1, limits]`.
    ///
    /// A caller error; the engine never retries it.
    #[error("invalid permits: {permits} (must be between 1 and {limits})")]
    InvalidPermits {
        /// The number of permits requested.
        permits: u32,
        /// The constraint capacity.
        limits: u32,
    },

    /// A constraint spec is malformed.
    #[error("invalid constraint spec: {message}")]
    InvalidSpec {
        /// Description of the problem.
        message: String,
    },

    /// A constraint could not be persisted.
    #[error("unable to save constraint {constraint_id}: {reason}")]
    UnableToSaveConstraint {
        /// The constraint that failed to save.
        constraint_id: ConstraintId,
        /// Why the save failed.
        reason: String,
        /// The underlying registry failure, if any.
        #[source]
        source: Option<Box<Error>>,
    },

    /// Registration gave up after its bounded optimistic-retry loop.
    ///
    /// The caller may retry the whole call.
    #[error("unable to register consumer {consumer_id} on {constraint_id}/{unit}: {reason}")]
    UnableToRegisterConsumer {
        /// The constraint being registered against.
        constraint_id: ConstraintId,
        /// The unit being registered against.
        unit: ConstraintUnit,
        /// The consumer that could not be registered.
        consumer_id: ConsumerId,
        /// Why registration failed.
        reason: String,
    },

    /// The consumer could never be admitted: its own holding scope holds
    /// too many of the unit's permits for it, or for a FIFO waiter ahead of
    /// it, to ever fit.
    #[error(
        "consumer {consumer_id} would be permanently blocked on {constraint_id}/{unit} behind {holder} in the same scope"
    )]
    PermanentlyBlockedConsumer {
        /// The constraint being registered against.
        constraint_id: ConstraintId,
        /// The unit being registered against.
        unit: ConstraintUnit,
        /// The consumer that was rejected.
        consumer_id: ConsumerId,
        /// The active consumer sharing its holding scope.
        holder: ConsumerId,
    },

    /// A registry was asked for a state transition the lifecycle forbids.
    #[error("invalid consumer state transition: {from} -> {to}")]
    InvalidTransition {
        /// The expected current state.
        from: ConsumerState,
        /// The requested target state.
        to: ConsumerState,
    },

    /// A registry operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An error from bulwark-core.
    #[error("core error: {0}")]
    Core(#[from] bulwark_core::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if retrying the same call later may succeed.
    ///
    /// Only exhausted registrations and storage failures qualify; caller
    /// errors and permanently blocked consumers must be surfaced instead.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UnableToRegisterConsumer { .. } | Self::Storage { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn invalid_permits_display() {
        let err = Error::InvalidPermits {
            permits: 11,
            limits: 10,
        };
        assert_eq!(
            err.to_string(),
            "invalid permits: 11 (must be between 1 and 10)"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn invalid_transition_display() {
        let err = Error::InvalidTransition {
            from: ConsumerState::Blocked,
            to: ConsumerState::Finished,
        };
        let msg = err.to_string();
        assert!(msg.contains("BLOCKED"));
        assert!(msg.contains("FINISHED"));
    }

    #[test]
    fn save_error_keeps_source() {
        let err = Error::UnableToSaveConstraint {
            constraint_id: ConstraintId::new_unchecked("deploy-slots"),
            reason: "registry unavailable".into(),
            source: Some(Box::new(Error::storage("lock poisoned"))),
        };
        assert!(err.to_string().contains("deploy-slots"));
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn storage_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::TimedOut, "store timed out");
        let err = Error::storage_with_source("failed to load consumers", source);
        assert!(err.to_string().contains("storage error"));
        assert!(StdError::source(&err).is_some());
        assert!(err.is_retryable());
    }

    #[test]
    fn permanently_blocked_is_not_retryable() {
        let err = Error::PermanentlyBlockedConsumer {
            constraint_id: ConstraintId::new_unchecked("deploy-slots"),
            unit: ConstraintUnit::new_unchecked("production"),
            consumer_id: ConsumerId::new_unchecked("b"),
            holder: ConsumerId::new_unchecked("a"),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("permanently blocked"));
    }
}
