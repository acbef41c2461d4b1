//! Batch retention: age and capacity eviction.
//!
//! Every batch deletion, whatever triggered it, is described by an
//! [`EvictionEvent`] and logged before the file is removed. There are no
//! silent deletes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tq_common::BatchId;
use tracing::{debug, info};

use crate::event_names;

/// A record of one batch deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictionEvent {
    /// When the deletion happened.
    pub timestamp: DateTime<Utc>,

    pub batch_id: BatchId,

    /// Bytes the batch file occupied on disk.
    pub size_bytes: u64,

    pub event_count: usize,

    /// Age of the batch when deleted.
    pub age_secs: u64,

    pub reason: EvictionReason,
}

/// Reason a batch was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Closed batch outlived the retention age.
    Expired { max_age_secs: u64 },

    /// Oldest batch evicted to make room under the storage cap.
    OverCapacity {
        cap_bytes: u64,
        used_bytes: u64,
        needed_bytes: u64,
    },

    /// Consent moved to not granted.
    ConsentRevoked,

    /// Intake acknowledged the batch.
    Uploaded,

    /// Intake (or the local payload limit) refused the batch permanently.
    Rejected { reason: String },

    /// No record in the file could be decoded.
    Corrupted { skipped_lines: usize },
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Expired { .. } => "expired",
            EvictionReason::OverCapacity { .. } => "over_capacity",
            EvictionReason::ConsentRevoked => "consent_revoked",
            EvictionReason::Uploaded => "uploaded",
            EvictionReason::Rejected { .. } => "rejected",
            EvictionReason::Corrupted { .. } => "corrupted",
        }
    }

    /// Whether the deletion loses data that never reached the intake.
    pub fn is_data_loss(&self) -> bool {
        !matches!(self, EvictionReason::Uploaded)
    }
}

impl EvictionEvent {
    pub(crate) fn new(
        batch_id: BatchId,
        size_bytes: u64,
        event_count: usize,
        reason: EvictionReason,
        now: DateTime<Utc>,
    ) -> Self {
        EvictionEvent {
            timestamp: now,
            batch_id,
            size_bytes,
            event_count,
            age_secs: batch_id.age(now).as_secs(),
            reason,
        }
    }

    /// Emit the event on the diagnostic channel.
    pub(crate) fn log(&self) {
        if self.reason.is_data_loss() {
            info!(
                event = event_names::STORE_EVICTED,
                batch_id = %self.batch_id,
                size_bytes = self.size_bytes,
                event_count = self.event_count,
                age_secs = self.age_secs,
                reason = self.reason.as_str(),
                "Evicting batch {} ({} bytes, {} events, {}s old) - {:?}",
                self.batch_id,
                self.size_bytes,
                self.event_count,
                self.age_secs,
                self.reason
            );
        } else {
            debug!(
                event = event_names::STORE_EVICTED,
                batch_id = %self.batch_id,
                size_bytes = self.size_bytes,
                reason = self.reason.as_str(),
                "Deleting uploaded batch {}",
                self.batch_id
            );
        }
    }
}

/// Ids of closed batches strictly older than `max_age`.
pub(crate) fn expired_ids<'a>(
    ids: impl IntoIterator<Item = &'a BatchId>,
    now: DateTime<Utc>,
    max_age: Duration,
) -> Vec<BatchId> {
    ids.into_iter()
        .filter(|id| id.age(now) > max_age)
        .copied()
        .collect()
}

/// Oldest-first victims needed to fit `needed` more bytes under `cap`.
///
/// `oldest_first` yields `(id, file_bytes)` in creation order. Returns the
/// victims and whether the new data fits once they are gone.
pub(crate) fn capacity_victims(
    oldest_first: impl IntoIterator<Item = (BatchId, u64)>,
    used: u64,
    needed: u64,
    cap: u64,
) -> (Vec<BatchId>, bool) {
    let mut remaining = used;
    let mut victims = Vec::new();
    let mut candidates = oldest_first.into_iter();

    while remaining.saturating_add(needed) > cap {
        match candidates.next() {
            Some((id, bytes)) => {
                remaining = remaining.saturating_sub(bytes);
                victims.push(id);
            }
            None => break,
        }
    }

    (victims, remaining.saturating_add(needed) <= cap)
}
