//! Observability infrastructure for Bulwark.
//!
//! Structured logging with consistent spans. Every engine operation runs
//! inside a [`constraint_span`] so admission decisions can be correlated
//! across concurrent callers racing on the same unit.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use serde::{Deserialize, Serialize};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `bulwark_constraint=debug`)
///
/// # Example
///
/// ```rust
/// use bulwark_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for an operation on one constraint unit.
///
/// # Example
///
/// ```rust
/// use bulwark_core::observability::constraint_span;
///
/// let span = constraint_span("register_consumer", "deploy-slots", "production");
/// let _guard = span.enter();
/// // ... admission decision
/// ```
#[must_use]
pub fn constraint_span(operation: &str, constraint_id: &str, unit: &str) -> Span {
    tracing::info_span!(
        "constraint",
        op = operation,
        constraint_id = constraint_id,
        unit = unit,
    )
}

/// Creates a span for one pass of the driver loop.
#[must_use]
pub fn driver_span(tick: u64) -> Span {
    tracing::info_span!("constraint_driver", tick = tick)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        // Should not panic (uses Once internally)
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }

    #[test]
    fn test_span_helper_creates_span() {
        let span = constraint_span("runnable_consumers", "deploy-slots", "staging");
        let _guard = span.enter();
        tracing::info!("test message in span");
    }

    #[test]
    fn log_format_deserializes_lowercase() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
    }
}
