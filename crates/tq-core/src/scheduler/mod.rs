//! Upload scheduler.
//!
//! A timer-driven state machine. Every tick:
//!
//! 1. closes a stale open batch and evicts batches past the retention age;
//! 2. drops retry bookkeeping for batches no longer on disk;
//! 3. checks consent and platform conditions, going back to idle if either
//!    blocks;
//! 4. uploads due batches, oldest first, at most `max_concurrent_uploads` at
//!    a time and never two attempts for the same batch;
//! 5. deletes on success or rejection, schedules backoff on retryable
//!    failure.
//!
//! The scheduler never touches the writer; instrumentation callers are never
//! blocked by it beyond the store lock.

pub mod backoff;

pub use backoff::{BackoffPolicy, RetryState};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tq_common::{BatchId, ConsentState};
use tq_config::PipelineConfig;
use tq_store::{Batch, BatchStore, ConsentGate, EvictionReason, StoreError};
use tracing::warn;

use crate::conditions::{ConditionsCheck, ConditionsProvider};
use crate::log_event;
use crate::logging::{event_names, LogContext, Stage};
use crate::uploader::{FailureReason, UploadOutcome, Uploader};

/// Granularity of shutdown checks while sleeping between ticks.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Where the scheduler is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Idle,
    WaitingForConditions,
    Uploading,
    /// Nothing due yet; at least one batch is waiting out a backoff delay.
    Backoff,
}

impl std::fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerPhase::Idle => write!(f, "idle"),
            SchedulerPhase::WaitingForConditions => write!(f, "waiting_for_conditions"),
            SchedulerPhase::Uploading => write!(f, "uploading"),
            SchedulerPhase::Backoff => write!(f, "backoff"),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub low_battery_threshold: f64,
    pub max_concurrent_uploads: usize,
    pub max_retention_age: Duration,
    pub endpoint: String,
    pub backoff: BackoffPolicy,
}

impl SchedulerConfig {
    pub fn from_config(config: &PipelineConfig) -> Self {
        SchedulerConfig {
            tick_interval: config.scheduler.tick_interval(),
            low_battery_threshold: config.scheduler.low_battery_threshold,
            max_concurrent_uploads: config.upload.max_concurrent_uploads.max(1),
            max_retention_age: config.storage.max_retention_age(),
            endpoint: config.upload.endpoint.clone(),
            backoff: BackoffPolicy::from_settings(&config.scheduler.backoff),
        }
    }
}

/// Why a tick did not upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Blocked {
    Consent { state: ConsentState },
    Conditions { reason: String },
}

/// Summary of one tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    /// Phase the tick ended in.
    pub phase: SchedulerPhase,
    pub rotated: Option<BatchId>,
    pub expired: usize,
    pub blocked: Option<Blocked>,
    pub attempted: usize,
    pub uploaded: usize,
    pub retried: usize,
    pub rejected: usize,
    pub cancelled: usize,
    /// Closed batches left on disk after the tick.
    pub pending: usize,
    /// Pending batches still inside their backoff window.
    pub backing_off: usize,
    /// Most recent failure of this tick.
    pub last_failure: Option<FailureReason>,
}

impl TickReport {
    fn new(at: DateTime<Utc>) -> Self {
        TickReport {
            at,
            phase: SchedulerPhase::WaitingForConditions,
            rotated: None,
            expired: 0,
            blocked: None,
            attempted: 0,
            uploaded: 0,
            retried: 0,
            rejected: 0,
            cancelled: 0,
            pending: 0,
            backing_off: 0,
            last_failure: None,
        }
    }
}

/// Cumulative counters since the scheduler was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub attempts: u64,
    pub uploaded: u64,
    pub retried: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub expired: u64,
}

struct SchedulerState {
    phase: SchedulerPhase,
    retries: BTreeMap<BatchId, RetryState>,
    in_flight: BTreeSet<BatchId>,
    stats: SchedulerStats,
}

/// Drives uploads of closed batches.
pub struct UploadScheduler {
    store: Arc<BatchStore>,
    gate: Arc<ConsentGate>,
    uploader: Uploader,
    conditions: Arc<dyn ConditionsProvider>,
    config: SchedulerConfig,
    ctx: LogContext,
    state: Mutex<SchedulerState>,
}

impl UploadScheduler {
    pub fn new(
        gate: Arc<ConsentGate>,
        uploader: Uploader,
        conditions: Arc<dyn ConditionsProvider>,
        config: SchedulerConfig,
        ctx: LogContext,
    ) -> Self {
        UploadScheduler {
            store: Arc::clone(gate.store()),
            gate,
            uploader,
            conditions,
            config,
            ctx,
            state: Mutex::new(SchedulerState {
                phase: SchedulerPhase::Idle,
                retries: BTreeMap::new(),
                in_flight: BTreeSet::new(),
                stats: SchedulerStats::default(),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn phase(&self) -> Result<SchedulerPhase, StoreError> {
        Ok(self.lock_state()?.phase)
    }

    pub fn stats(&self) -> Result<SchedulerStats, StoreError> {
        Ok(self.lock_state()?.stats)
    }

    /// Retry bookkeeping for one batch, if it has failed before.
    pub fn retry_state(&self, id: BatchId) -> Result<Option<RetryState>, StoreError> {
        Ok(self.lock_state()?.retries.get(&id).cloned())
    }

    /// Time until the next tick can do useful work: the earliest backoff
    /// deadline, capped at the tick interval.
    pub fn next_tick_delay(&self, now: DateTime<Utc>) -> Result<Duration, StoreError> {
        let state = self.lock_state()?;
        let earliest = state.retries.values().map(|r| r.next_attempt_at).min();
        Ok(match earliest {
            Some(at) => (at - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.config.tick_interval),
            None => self.config.tick_interval,
        })
    }

    /// Run one tick now.
    pub fn tick(&self) -> Result<TickReport, StoreError> {
        self.tick_at(Utc::now(), &AtomicBool::new(false))
    }

    /// Run one tick as of `now`. Raising `shutdown` cancels in-flight sends.
    pub fn tick_at(
        &self,
        now: DateTime<Utc>,
        shutdown: &AtomicBool,
    ) -> Result<TickReport, StoreError> {
        let mut report = TickReport::new(now);
        self.set_phase(SchedulerPhase::WaitingForConditions)?;

        report.rotated = self.store.rotate_if_stale(now)?;
        report.expired = self
            .store
            .evict_expired(now, self.config.max_retention_age)?
            .len();

        let pending = self.store.pending_ids()?;
        let candidates = {
            let mut state = self.lock_state()?;
            state.stats.ticks += 1;
            state.stats.expired += report.expired as u64;
            let on_disk: BTreeSet<BatchId> = pending.iter().copied().collect();
            state.retries.retain(|id, _| on_disk.contains(id));

            if let Some(blocked) = self.check_blocked() {
                log_event!(
                    self.ctx,
                    DEBUG,
                    event_names::SCHEDULE_WAITING,
                    Stage::Schedule,
                    format!("Not uploading: {:?}", blocked),
                    pending = pending.len()
                );
                report.blocked = Some(blocked);
                state.phase = SchedulerPhase::Idle;
                report.phase = SchedulerPhase::Idle;
                report.pending = pending.len();
                report.backing_off = state.retries.values().filter(|r| !r.is_due(now)).count();
                return Ok(report);
            }

            let slots = self
                .config
                .max_concurrent_uploads
                .saturating_sub(state.in_flight.len());
            let due: Vec<BatchId> = pending
                .iter()
                .copied()
                .filter(|id| !state.in_flight.contains(id))
                .filter(|id| state.retries.get(id).map_or(true, |r| r.is_due(now)))
                .take(slots)
                .collect();
            state.in_flight.extend(due.iter().copied());
            if !due.is_empty() {
                state.phase = SchedulerPhase::Uploading;
            }
            due
        };

        let batches = self.read_candidates(&candidates);
        let results = match batches {
            Ok((batches, epoch)) => self.upload_all(&batches, epoch, shutdown),
            Err(e) => {
                self.release(&candidates)?;
                return Err(e);
            }
        };
        report.attempted = results.len();

        let mut state = self.lock_state()?;
        for (id, outcome) in results {
            self.apply_outcome(&mut state, &mut report, id, outcome, now);
        }
        for id in &candidates {
            state.in_flight.remove(id);
        }

        let remaining = self.store.pending_ids()?;
        report.pending = remaining.len();
        report.backing_off = remaining
            .iter()
            .filter(|id| state.retries.get(id).is_some_and(|r| !r.is_due(now)))
            .count();
        report.phase = if report.backing_off > 0 {
            SchedulerPhase::Backoff
        } else {
            SchedulerPhase::Idle
        };
        state.phase = report.phase;

        log_event!(
            self.ctx,
            DEBUG,
            event_names::SCHEDULE_TICK,
            Stage::Schedule,
            format!("Tick finished in phase {}", report.phase),
            attempted = report.attempted,
            uploaded = report.uploaded,
            pending = report.pending
        );
        Ok(report)
    }

    /// Tick every `tick_interval` until `shutdown` is raised.
    pub fn run(&self, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::Acquire) {
            let started = Instant::now();
            if let Err(e) = self.tick_at(Utc::now(), shutdown) {
                warn!(
                    event = event_names::INTERNAL_ERROR,
                    error = %e,
                    "Scheduler tick failed: {}",
                    e
                );
            }

            let deadline = started + self.config.tick_interval;
            while !shutdown.load(Ordering::Acquire) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::sleep(SLEEP_SLICE.min(deadline - now));
            }
        }

        log_event!(
            self.ctx,
            INFO,
            event_names::SCHEDULE_STOPPED,
            Stage::Schedule,
            "Scheduler stopped"
        );
    }

    fn check_blocked(&self) -> Option<Blocked> {
        let state = self.gate.current_state();
        if !state.allows_upload() {
            return Some(Blocked::Consent { state });
        }
        let check =
            ConditionsCheck::evaluate(self.conditions.as_ref(), self.config.low_battery_threshold);
        check.blocker().map(|reason| Blocked::Conditions {
            reason: reason.to_string(),
        })
    }

    /// Copies of the batches plus the revocation epoch, both read under the
    /// store lock. Consent transitions take the same lock, so the epoch is the
    /// one the copies belong to.
    fn read_candidates(&self, ids: &[BatchId]) -> Result<(Vec<Batch>, u64), StoreError> {
        let mut guard = self.store.lock()?;
        let epoch = self.gate.revocation_epoch();
        let mut batches = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(batch) = guard.read_batch(*id)? {
                batches.push(batch);
            }
        }
        Ok((batches, epoch))
    }

    fn upload_all(
        &self,
        batches: &[Batch],
        epoch: u64,
        shutdown: &AtomicBool,
    ) -> Vec<(BatchId, UploadOutcome)> {
        thread::scope(|s| {
            let handles: Vec<_> = batches
                .iter()
                .map(|batch| {
                    log_event!(
                        self.ctx,
                        DEBUG,
                        event_names::UPLOAD_STARTED,
                        Stage::Upload,
                        format!("Uploading batch {}", batch.id),
                        event_count = batch.len(),
                        size_bytes = batch.total_size_bytes
                    );
                    let handle = s.spawn(move || {
                        self.uploader.upload_since(
                            batch,
                            &self.config.endpoint,
                            shutdown,
                            Some(epoch),
                        )
                    });
                    (batch.id, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(id, handle)| {
                    let outcome = handle.join().unwrap_or_else(|_| {
                        warn!(event = event_names::INTERNAL_ERROR, "upload thread panicked");
                        UploadOutcome::RetryableFailure {
                            reason: FailureReason::Transport {
                                message: "upload thread panicked".to_string(),
                            },
                        }
                    });
                    (id, outcome)
                })
                .collect()
        })
    }

    fn apply_outcome(
        &self,
        state: &mut SchedulerState,
        report: &mut TickReport,
        id: BatchId,
        outcome: UploadOutcome,
        now: DateTime<Utc>,
    ) {
        state.stats.attempts += 1;
        match outcome {
            UploadOutcome::Success { status } => {
                state.retries.remove(&id);
                self.delete(id, EvictionReason::Uploaded);
                report.uploaded += 1;
                state.stats.uploaded += 1;
                log_event!(
                    self.ctx,
                    INFO,
                    event_names::UPLOAD_SUCCEEDED,
                    Stage::Upload,
                    format!("Uploaded batch {}", id),
                    status = status
                );
            }
            UploadOutcome::RetryableFailure { reason } => {
                if matches!(
                    reason,
                    FailureReason::Cancelled | FailureReason::ConsentViolation { .. }
                ) {
                    report.cancelled += 1;
                    state.stats.cancelled += 1;
                    log_event!(
                        self.ctx,
                        INFO,
                        event_names::UPLOAD_CANCELLED,
                        Stage::Upload,
                        format!("Upload of batch {} cancelled: {}", id, reason)
                    );
                    // Pending keeps the batch for a later grant; not_granted
                    // must leave nothing behind even if the purge missed it.
                    if self.gate.current_state() == ConsentState::NotGranted {
                        state.retries.remove(&id);
                        self.delete(id, EvictionReason::ConsentRevoked);
                    }
                } else {
                    let retry = RetryState::record_failure(
                        state.retries.get(&id),
                        &self.config.backoff,
                        now,
                        reason.to_string(),
                    );
                    log_event!(
                        self.ctx,
                        WARN,
                        event_names::UPLOAD_RETRY,
                        Stage::Upload,
                        format!(
                            "Upload of batch {} failed ({}), retry {} in {:?}",
                            id, reason, retry.attempts, retry.last_delay
                        ),
                        attempts = retry.attempts
                    );
                    state.retries.insert(id, retry);
                    report.retried += 1;
                    state.stats.retried += 1;
                }
                report.last_failure = Some(reason);
            }
            UploadOutcome::NonRetryableFailure { reason } => {
                state.retries.remove(&id);
                log_event!(
                    self.ctx,
                    WARN,
                    event_names::UPLOAD_REJECTED,
                    Stage::Upload,
                    format!("Dropping batch {}: {}", id, reason)
                );
                self.delete(
                    id,
                    EvictionReason::Rejected {
                        reason: reason.to_string(),
                    },
                );
                report.rejected += 1;
                state.stats.rejected += 1;
                report.last_failure = Some(reason);
            }
        }
    }

    fn delete(&self, id: BatchId, reason: EvictionReason) {
        if let Err(e) = self.store.delete(id, reason) {
            warn!(
                event = event_names::INTERNAL_ERROR,
                batch_id = %id,
                error = %e,
                "Failed to delete batch {}: {}",
                id,
                e
            );
        }
    }

    fn release(&self, ids: &[BatchId]) -> Result<(), StoreError> {
        let mut state = self.lock_state()?;
        for id in ids {
            state.in_flight.remove(id);
        }
        state.phase = SchedulerPhase::Idle;
        Ok(())
    }

    fn set_phase(&self, phase: SchedulerPhase) -> Result<(), StoreError> {
        self.lock_state()?.phase = phase;
        Ok(())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, SchedulerState>, StoreError> {
        self.state
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::StaticConditions;
    use crate::uploader::{Transport, TransportError, TransportRequest, TransportResponse, UploaderConfig};
    use chrono::TimeZone;
    use tempfile::TempDir;
    use tq_store::{BatchWriter, EventRecord, StoreConfig};

    struct Always(u16);

    impl Transport for Always {
        fn send(&self, _request: &TransportRequest) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse { status: self.0 })
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_600_000 + secs, 0).unwrap()
    }

    fn setup(dir: &TempDir, status: u16) -> (UploadScheduler, BatchWriter) {
        let store = BatchStore::open(
            StoreConfig::new(dir.path())
                .with_max_batch_size(10)
                .with_max_retention_age(Duration::from_secs(3600)),
        )
        .unwrap();
        let gate = ConsentGate::open(store.clone(), ConsentState::Granted).unwrap();
        let writer = BatchWriter::new(store, gate.clone());
        let config = SchedulerConfig::from_config(&PipelineConfig::default());
        let config = SchedulerConfig {
            max_retention_age: Duration::from_secs(3600),
            ..config
        };
        let uploader = Uploader::new(UploaderConfig::default(), Arc::new(Always(status)))
            .with_consent(gate.clone());
        let scheduler = UploadScheduler::new(
            gate,
            uploader,
            Arc::new(StaticConditions::always()),
            config,
            LogContext::new("run-test", "host-test"),
        );
        (scheduler, writer)
    }

    #[test]
    fn test_phase_starts_idle() {
        let dir = TempDir::new().unwrap();
        let (scheduler, _) = setup(&dir, 200);
        assert_eq!(scheduler.phase().unwrap(), SchedulerPhase::Idle);
    }

    #[test]
    fn test_next_tick_delay_follows_backoff() {
        let dir = TempDir::new().unwrap();
        let (scheduler, writer) = setup(&dir, 503);
        assert_eq!(
            scheduler.next_tick_delay(ts(0)).unwrap(),
            scheduler.config().tick_interval
        );

        writer.append_at(EventRecord::new(vec![1; 8]), ts(0));
        writer.append_at(EventRecord::new(vec![2; 8]), ts(0));
        let report = scheduler.tick_at(ts(1), &AtomicBool::new(false)).unwrap();
        assert_eq!(report.retried, 1);

        let id = writer.store().pending_ids().unwrap()[0];
        let retry = scheduler.retry_state(id).unwrap().unwrap();
        let expected = (retry.next_attempt_at - ts(1)).to_std().unwrap();
        assert!(expected < scheduler.config().tick_interval);
        assert_eq!(scheduler.next_tick_delay(ts(1)).unwrap(), expected);
        assert_eq!(
            scheduler.next_tick_delay(ts(600)).unwrap(),
            Duration::ZERO
        );
    }

    #[test]
    fn test_rejection_deletes_and_clears_retry() {
        let dir = TempDir::new().unwrap();
        let (scheduler, writer) = setup(&dir, 400);
        writer.append_at(EventRecord::new(vec![1; 8]), ts(0));
        writer.append_at(EventRecord::new(vec![2; 8]), ts(0));

        let report = scheduler.tick_at(ts(1), &AtomicBool::new(false)).unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.phase, SchedulerPhase::Idle);
        assert_eq!(
            report.last_failure,
            Some(FailureReason::Rejected { status: 400 })
        );
        assert_eq!(writer.store().pending_ids().unwrap().len(), 0);
    }

    #[test]
    fn test_stale_open_batch_is_rotated_and_uploaded() {
        let dir = TempDir::new().unwrap();
        let (scheduler, writer) = setup(&dir, 202);
        writer.append_at(EventRecord::new(vec![1; 4]), ts(0));

        let report = scheduler.tick_at(ts(11), &AtomicBool::new(false)).unwrap();
        assert!(report.rotated.is_some());
        assert_eq!(report.uploaded, 1);
        assert_eq!(scheduler.stats().unwrap().uploaded, 1);
    }

    #[test]
    fn test_revocation_between_read_and_send_cancels() {
        let dir = TempDir::new().unwrap();
        let (scheduler, writer) = setup(&dir, 200);
        writer.append_at(EventRecord::new(vec![1; 8]), ts(0));
        writer.append_at(EventRecord::new(vec![2; 8]), ts(0));
        let ids = writer.store().pending_ids().unwrap();

        let (batches, epoch) = scheduler.read_candidates(&ids).unwrap();
        assert_eq!(batches.len(), 1);
        writer.gate().set_state(ConsentState::NotGranted).unwrap();
        writer.gate().set_state(ConsentState::Granted).unwrap();

        let results = scheduler.upload_all(&batches, epoch, &AtomicBool::new(false));
        assert_eq!(
            results,
            vec![(
                ids[0],
                UploadOutcome::RetryableFailure {
                    reason: FailureReason::Cancelled
                }
            )]
        );
    }

    #[test]
    fn test_consent_violation_under_not_granted_deletes_batch() {
        let dir = TempDir::new().unwrap();
        let (scheduler, writer) = setup(&dir, 200);
        writer.gate().set_state(ConsentState::NotGranted).unwrap();

        // Written straight through the store, past the gate.
        let id = {
            let mut guard = writer.store().lock().unwrap();
            guard.append(&EventRecord::new(vec![1; 8]), ts(0)).unwrap();
            guard.close_open().unwrap().unwrap()
        };
        assert_eq!(writer.store().pending_ids().unwrap(), vec![id]);

        let mut report = TickReport::new(ts(1));
        {
            let mut state = scheduler.lock_state().unwrap();
            scheduler.apply_outcome(
                &mut state,
                &mut report,
                id,
                UploadOutcome::RetryableFailure {
                    reason: FailureReason::ConsentViolation {
                        state: ConsentState::NotGranted,
                    },
                },
                ts(1),
            );
        }
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.retried, 0);
        assert!(writer.store().pending_ids().unwrap().is_empty());
    }

    #[test]
    fn test_consent_pending_blocks_upload() {
        let dir = TempDir::new().unwrap();
        let (scheduler, writer) = setup(&dir, 200);
        writer.gate().set_state(ConsentState::Pending).unwrap();
        writer.append_at(EventRecord::new(vec![1; 8]), ts(0));
        writer.append_at(EventRecord::new(vec![2; 8]), ts(0));

        let report = scheduler.tick_at(ts(1), &AtomicBool::new(false)).unwrap();
        assert_eq!(
            report.blocked,
            Some(Blocked::Consent {
                state: ConsentState::Pending
            })
        );
        assert_eq!(report.pending, 1);
    }
}
