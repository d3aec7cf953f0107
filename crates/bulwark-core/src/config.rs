//! Engine configuration.
//!
//! Tuning knobs for the admission engine and its driver loop. Values come from
//! defaults, optionally overridden by `BULWARK_*` environment variables via
//! [`EngineConfig::from_env`].
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `BULWARK_REGISTER_MAX_ATTEMPTS` | `max_register_attempts` | 5 |
//! | `BULWARK_UNBLOCK_MAX_ATTEMPTS` | `max_unblock_attempts` | 5 |
//! | `BULWARK_DRIVER_INTERVAL_MS` | `driver_interval_ms` | 1000 |
//! | `BULWARK_LOG_FORMAT` | `log_format` (`json`/`pretty`) | `pretty` |
//!
//! Hosts call [`EngineConfig::init_logging`] once at startup to apply
//! `log_format`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::observability::LogFormat;

/// Default number of read-decide-write attempts for a registration.
pub const DEFAULT_MAX_REGISTER_ATTEMPTS: u32 = 5;

/// Default number of re-check attempts for an unblock whose snapshot went stale.
pub const DEFAULT_MAX_UNBLOCK_ATTEMPTS: u32 = 5;

/// Default driver loop tick interval in milliseconds.
pub const DEFAULT_DRIVER_INTERVAL_MS: u64 = 1_000;

/// Configuration for the admission engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bounded optimistic-retry attempts for `register_consumer`.
    #[serde(default = "default_max_register_attempts")]
    pub max_register_attempts: u32,

    /// Bounded re-check attempts for `consumer_unblocked` on stale snapshots.
    #[serde(default = "default_max_unblock_attempts")]
    pub max_unblock_attempts: u32,

    /// Interval between driver loop passes, in milliseconds.
    #[serde(default = "default_driver_interval_ms")]
    pub driver_interval_ms: u64,

    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

const fn default_max_register_attempts() -> u32 {
    DEFAULT_MAX_REGISTER_ATTEMPTS
}

const fn default_max_unblock_attempts() -> u32 {
    DEFAULT_MAX_UNBLOCK_ATTEMPTS
}

const fn default_driver_interval_ms() -> u64 {
    DEFAULT_DRIVER_INTERVAL_MS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_register_attempts: DEFAULT_MAX_REGISTER_ATTEMPTS,
            max_unblock_attempts: DEFAULT_MAX_UNBLOCK_ATTEMPTS,
            driver_interval_ms: DEFAULT_DRIVER_INTERVAL_MS,
            log_format: LogFormat::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from `BULWARK_*` environment variables.
    ///
    /// Unset or whitespace-only variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed, or if
    /// the resulting configuration fails [`EngineConfig::validate`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// [`EngineConfig::from_env`] delegates here; tests pass a map instead of
    /// mutating the process environment.
    ///
    /// # Errors
    ///
    /// Same as [`EngineConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(attempts) = parse_u32(&lookup, "BULWARK_REGISTER_MAX_ATTEMPTS")? {
            config.max_register_attempts = attempts;
        }
        if let Some(attempts) = parse_u32(&lookup, "BULWARK_UNBLOCK_MAX_ATTEMPTS")? {
            config.max_unblock_attempts = attempts;
        }
        if let Some(interval) = parse_u64(&lookup, "BULWARK_DRIVER_INTERVAL_MS")? {
            config.driver_interval_ms = interval;
        }
        if let Some(format) = non_empty(&lookup, "BULWARK_LOG_FORMAT") {
            config.log_format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(Error::InvalidInput(format!(
                        "BULWARK_LOG_FORMAT must be 'json' or 'pretty', got '{other}'"
                    )));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any attempt bound or the driver interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_register_attempts == 0 {
            return Err(Error::InvalidInput(
                "max_register_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_unblock_attempts == 0 {
            return Err(Error::InvalidInput(
                "max_unblock_attempts must be at least 1".to_string(),
            ));
        }
        if self.driver_interval_ms == 0 {
            return Err(Error::InvalidInput(
                "driver_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Installs the global subscriber in the configured [`LogFormat`].
    ///
    /// Only the first call in a process takes effect.
    pub fn init_logging(&self) {
        crate::observability::init_logging(self.log_format);
    }

    /// Returns the driver tick interval.
    #[must_use]
    pub const fn driver_interval(&self) -> Duration {
        Duration::from_millis(self.driver_interval_ms)
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_u32(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<u32>> {
    let Some(v) = non_empty(lookup, name) else {
        return Ok(None);
    };
    v.parse::<u32>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u32: {e}")))
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<u64>> {
    let Some(v) = non_empty(lookup, name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
}
