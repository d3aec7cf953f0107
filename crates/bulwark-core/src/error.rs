//! Error types and result aliases for Bulwark primitives.
//!
//! Engine-level failures (permits, registration, storage) are defined in
//! `bulwark-constraint`; this module only covers what the shared primitives
//! themselves can reject.

/// The result type used throughout bulwark-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when building Bulwark primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// Invalid input was provided (typically configuration).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_id_display() {
        let err = Error::InvalidId {
            message: "constraint ID cannot be empty".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid identifier: constraint ID cannot be empty"
        );
    }

    #[test]
    fn invalid_input_display() {
        let err = Error::InvalidInput("BULWARK_DRIVER_INTERVAL_MS must be a u64".into());
        assert!(err.to_string().starts_with("invalid input:"));
    }
}
