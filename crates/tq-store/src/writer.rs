//! Consent-gated, durable batch writer.
//!
//! `append` is the instrumentation boundary: it never returns an error and
//! never panics. Failures are logged and counted, and the caller gets an
//! [`AppendOutcome`] it is free to ignore.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tq_common::BatchId;
use tracing::warn;

use crate::consent::ConsentGate;
use crate::error::StoreError;
use crate::event_names;
use crate::record::EventRecord;
use crate::store::BatchStore;

/// What happened to one appended event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Durably written to the open batch.
    Persisted {
        batch_id: BatchId,
        /// Batch closed to make room for this event, if any.
        rotated: Option<BatchId>,
    },

    /// Consent is not granted; nothing was written.
    DiscardedNoConsent,

    /// The event does not fit under the storage cap even in an empty store.
    DroppedOverCapacity { needed_bytes: u64, cap_bytes: u64 },

    /// The disk write failed.
    DroppedDurability,
}

impl AppendOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, AppendOutcome::Persisted { .. })
    }
}

/// Counters for appends since the writer was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    pub persisted: u64,
    pub rotations: u64,
    pub discarded_no_consent: u64,
    pub dropped_over_capacity: u64,
    pub dropped_durability: u64,
}

#[derive(Default)]
struct Counters {
    persisted: AtomicU64,
    rotations: AtomicU64,
    discarded_no_consent: AtomicU64,
    dropped_over_capacity: AtomicU64,
    dropped_durability: AtomicU64,
}

/// Appends events to the store on behalf of instrumentation.
///
/// Safe to share across threads; appends are serialized by the store lock
/// so insertion order and size accounting stay consistent.
pub struct BatchWriter {
    store: Arc<BatchStore>,
    gate: Arc<ConsentGate>,
    counters: Counters,
}

impl BatchWriter {
    pub fn new(store: Arc<BatchStore>, gate: Arc<ConsentGate>) -> Self {
        BatchWriter {
            store,
            gate,
            counters: Counters::default(),
        }
    }

    /// Append an event now.
    pub fn append(&self, record: EventRecord) -> AppendOutcome {
        self.append_at(record, Utc::now())
    }

    /// Append an event, using `now` for rotation and batch naming.
    pub fn append_at(&self, record: EventRecord, now: DateTime<Utc>) -> AppendOutcome {
        match self.try_append_at(&record, now) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    event = event_names::STORE_APPEND_FAILED,
                    size_bytes = record.size_bytes(),
                    error = %e,
                    "Dropping event after durability failure: {}",
                    e
                );
                self.counters
                    .dropped_durability
                    .fetch_add(1, Ordering::Relaxed);
                AppendOutcome::DroppedDurability
            }
        }
    }

    /// Append, surfacing storage errors to the caller.
    pub fn try_append_at(
        &self,
        record: &EventRecord,
        now: DateTime<Utc>,
    ) -> Result<AppendOutcome, StoreError> {
        let mut guard = self.store.lock()?;

        // Checked under the store lock so a concurrent revocation either
        // sees this event and purges it, or this append sees the revocation.
        if !self.gate.current_state().allows_persistence() {
            self.counters
                .discarded_no_consent
                .fetch_add(1, Ordering::Relaxed);
            return Ok(AppendOutcome::DiscardedNoConsent);
        }

        let outcome = guard.append(record, now)?;
        match &outcome {
            AppendOutcome::Persisted { rotated, .. } => {
                self.counters.persisted.fetch_add(1, Ordering::Relaxed);
                if rotated.is_some() {
                    self.counters.rotations.fetch_add(1, Ordering::Relaxed);
                }
            }
            AppendOutcome::DroppedOverCapacity { .. } => {
                self.counters
                    .dropped_over_capacity
                    .fetch_add(1, Ordering::Relaxed);
            }
            AppendOutcome::DiscardedNoConsent | AppendOutcome::DroppedDurability => {}
        }
        Ok(outcome)
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            rotations: self.counters.rotations.load(Ordering::Relaxed),
            discarded_no_consent: self.counters.discarded_no_consent.load(Ordering::Relaxed),
            dropped_over_capacity: self.counters.dropped_over_capacity.load(Ordering::Relaxed),
            dropped_durability: self.counters.dropped_durability.load(Ordering::Relaxed),
        }
    }

    pub fn store(&self) -> &Arc<BatchStore> {
        &self.store
    }

    pub fn gate(&self) -> &Arc<ConsentGate> {
        &self.gate
    }
}
