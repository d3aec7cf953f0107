//! Admission strategies.
//!
//! A closed set of policies, each with exactly one admission rule and one
//! runnable-scan rule:
//!
//! | Strategy | Admission | Runnable scan |
//! |----------|-----------|---------------|
//! | `Fifo` | Blocked if anyone is queued, else fits-or-blocked | Stop at first misfit |
//! | `Asap` | Fits-or-blocked, queue ignored | Skip misfits, keep scanning |
//!
//! FIFO never lets a later, smaller request jump an earlier queued one. ASAP
//! admits anything that currently fits, maximizing utilization.

use std::fmt;

use serde::{Deserialize, Serialize};

use bulwark_core::ConsumerId;

use crate::consumer::{Consumer, ConsumerState};

/// Admission policy of a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Strict queue order: no request may overtake a blocked one.
    Fifo,
    /// Best effort: admit whatever fits right now.
    Asap,
}

impl Strategy {
    /// Decides the initial state of a new consumer.
    ///
    /// `current_usage` is the sum of permits held by ACTIVE consumers and
    /// `blocked_ahead` is the number of BLOCKED consumers already queued.
    #[must_use]
    pub fn admit(
        self,
        current_usage: u64,
        permits: u32,
        limits: u32,
        blocked_ahead: usize,
    ) -> ConsumerState {
        let fits = current_usage + u64::from(permits) <= u64::from(limits);
        match self {
            Self::Fifo if blocked_ahead > 0 => ConsumerState::Blocked,
            Self::Fifo | Self::Asap if fits => ConsumerState::Active,
            Self::Fifo | Self::Asap => ConsumerState::Blocked,
        }
    }

    /// Selects the blocked consumers that could be admitted now, in scan order.
    ///
    /// `blocked` must be given in registration order. Nothing is mutated;
    /// callers still have to unblock each candidate.
    #[must_use]
    pub fn scan<'a>(
        self,
        used_permits: u64,
        limits: u32,
        blocked: impl IntoIterator<Item = &'a Consumer>,
    ) -> Vec<ConsumerId> {
        let limits = u64::from(limits);
        let mut cumulative = used_permits;
        let mut runnable = Vec::new();

        for consumer in blocked {
            let next = cumulative + u64::from(consumer.permits);
            if next <= limits {
                cumulative = next;
                runnable.push(consumer.id.clone());
                continue;
            }
            match self {
                Self::Fifo => break,
                Self::Asap => {}
            }
        }

        runnable
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Fifo => "fifo",
            Self::Asap => "asap",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fifo => write!(f, "FIFO"),
            Self::Asap => write!(f, "ASAP"),
        }
    }
}
