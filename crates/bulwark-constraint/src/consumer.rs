//! Consumers and their lifecycle.
//!
//! A consumer is one admission request against a constraint unit.
//!
//! ## State Machine
//!
//! ```text
//!   (register) ──► ACTIVE ──(finish)──► FINISHED
//!        │            ▲
//!        ▼            │
//!     BLOCKED ──(unblock)
//! ```
//!
//! The state is decided at registration and only ever moves forward.
//! A BLOCKED consumer cannot finish directly and a FINISHED consumer is
//! immutable.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bulwark_core::ConsumerId;

/// Opaque caller metadata attached to a consumer.
///
/// The engine never interprets it; registries may use it to decide whether
/// two consumers share a holding scope.
pub type ConsumerContext = BTreeMap<String, serde_json::Value>;

/// Lifecycle state of a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumerState {
    /// Holds its permits.
    Active,
    /// Waiting for capacity.
    Blocked,
    /// Released its permits. Terminal.
    Finished,
}

impl ConsumerState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished)
    }

    /// Returns true if the transition from self to target is legal.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Blocked => matches!(target, Self::Active),
            Self::Active => matches!(target, Self::Finished),
            Self::Finished => false,
        }
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Blocked => write!(f, "BLOCKED"),
            Self::Finished => write!(f, "FINISHED"),
        }
    }
}

/// A registered consumer as stored by a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consumer {
    /// Consumer identifier, unique within its unit.
    pub id: ConsumerId,
    /// Permits requested (and held while ACTIVE).
    pub permits: u32,
    /// Current lifecycle state.
    pub state: ConsumerState,
    /// Registration sequence assigned by the registry; strictly increasing per unit.
    pub order: u64,
    /// Opaque caller metadata.
    #[serde(default)]
    pub context: ConsumerContext,
    /// When the consumer last entered ACTIVE, stamped by the registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquired_at: Option<DateTime<Utc>>,
}

impl Consumer {
    /// Returns true if the consumer currently holds its permits.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == ConsumerState::Active
    }

    /// Returns true if the consumer is waiting for capacity.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.state == ConsumerState::Blocked
    }
}

/// A consumer about to be inserted.
///
/// The registry turns it into a [`Consumer`] by assigning `order` (and
/// `acquired_at` when admitted as ACTIVE).
#[derive(Debug, Clone, PartialEq)]
pub struct NewConsumer {
    /// Consumer identifier.
    pub id: ConsumerId,
    /// Permits requested.
    pub permits: u32,
    /// Decided initial state (ACTIVE or BLOCKED).
    pub state: ConsumerState,
    /// Opaque caller metadata.
    pub context: ConsumerContext,
}

/// Sums the permits held by ACTIVE consumers.
#[must_use]
pub fn active_usage<'a>(consumers: impl IntoIterator<Item = &'a Consumer>) -> u64 {
    consumers
        .into_iter()
        .filter(|c| c.is_active())
        .map(|c| u64::from(c.permits))
        .sum()
}
