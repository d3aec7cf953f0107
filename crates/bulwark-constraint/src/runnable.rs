//! Runnable-set snapshots.

use serde::{Deserialize, Serialize};

use bulwark_core::ConsumerId;

/// Blocked consumers that could be admitted right now.
///
/// A read-only snapshot returned by `Constraint::runnable_consumers`. It is
/// never persisted and may be stale by the time it is acted on; unblocking
/// re-checks capacity against a fresh read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnableConsumers {
    /// Candidates in scan order.
    pub consumer_ids: Vec<ConsumerId>,
    /// Permits held by ACTIVE consumers when the snapshot was taken.
    pub used_permits: u64,
}

impl RunnableConsumers {
    /// Returns true if no consumer can be admitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumer_ids.is_empty()
    }

    /// Returns the number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.consumer_ids.len()
    }

    /// Returns true if `consumer_id` is among the candidates.
    #[must_use]
    pub fn contains(&self, consumer_id: &ConsumerId) -> bool {
        self.consumer_ids.contains(consumer_id)
    }
}
