//! The inventory of batch files on disk.
//!
//! All mutation of the batch directory goes through one mutex: appends,
//! rotation, reads for upload and deletions are mutually exclusive, so a
//! batch can never be deleted while it is being read.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tq_common::BatchId;
use tq_config::StorageSettings;
use tracing::{debug, info, warn};

use crate::batch::{decode_records, encode_record, Batch, BatchFileName, BatchFileState};
use crate::error::StoreError;
use crate::event_names;
use crate::record::EventRecord;
use crate::retention::{capacity_victims, expired_ids, EvictionEvent, EvictionReason};
use crate::writer::AppendOutcome;

/// Batch sequence numbers wrap at the width of their textual form.
const SEQ_MODULUS: u32 = 100_000_000;

/// Configuration for a batch store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Batch directory.
    pub dir: PathBuf,

    /// Event bytes that rotate the open batch.
    pub max_batch_size_bytes: u64,

    /// Age that rotates the open batch.
    pub max_batch_age: Duration,

    /// Age past which closed batches are evicted.
    pub max_retention_age: Duration,

    /// Bytes allowed on disk across all batch files.
    pub storage_cap_bytes: u64,
}

impl StoreConfig {
    /// Create config with default limits.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let defaults = StorageSettings::default();
        StoreConfig {
            dir: dir.into(),
            ..Self::from_settings(&defaults)
        }
    }

    /// Build from the `storage` section of `tracequeue.json`.
    pub fn from_settings(settings: &StorageSettings) -> Self {
        StoreConfig {
            dir: settings.resolved_dir(),
            max_batch_size_bytes: settings.max_batch_size_bytes,
            max_batch_age: settings.max_batch_age(),
            max_retention_age: settings.max_retention_age(),
            storage_cap_bytes: settings.storage_cap_bytes,
        }
    }

    pub fn with_max_batch_size(mut self, bytes: u64) -> Self {
        self.max_batch_size_bytes = bytes;
        self
    }

    pub fn with_max_batch_age(mut self, age: Duration) -> Self {
        self.max_batch_age = age;
        self
    }

    pub fn with_max_retention_age(mut self, age: Duration) -> Self {
        self.max_retention_age = age;
        self
    }

    pub fn with_storage_cap(mut self, bytes: u64) -> Self {
        self.storage_cap_bytes = bytes;
        self
    }
}

struct OpenBatch {
    id: BatchId,
    path: PathBuf,
    file: File,
    total_size_bytes: u64,
    file_bytes: u64,
    event_count: usize,
}

struct ClosedBatch {
    path: PathBuf,
    file_bytes: u64,
    total_size_bytes: u64,
    event_count: usize,
}

struct StoreState {
    open: Option<OpenBatch>,
    closed: BTreeMap<BatchId, ClosedBatch>,
    next_seq: u32,
}

/// Summary of the open batch.
#[derive(Debug, Clone, Serialize)]
pub struct OpenBatchInfo {
    pub batch_id: BatchId,
    pub event_count: usize,
    pub total_size_bytes: u64,
    pub age_secs: u64,
}

/// Store status for diagnostics and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub dir: PathBuf,
    pub open_batch: Option<OpenBatchInfo>,
    pub closed_batches: usize,
    pub closed_events: usize,
    pub bytes_on_disk: u64,
    pub storage_cap_bytes: u64,
    pub usage_percent: f64,
    pub oldest_batch_age_secs: Option<u64>,
}

/// Owner of the batch directory.
pub struct BatchStore {
    config: StoreConfig,
    state: Mutex<StoreState>,
}

impl BatchStore {
    /// Open (or create) a batch directory.
    ///
    /// Leftover open batches from a previous process are closed so their
    /// durable events become uploadable, and the id sequence resumes after
    /// the highest id found.
    pub fn open(config: StoreConfig) -> Result<Arc<Self>, StoreError> {
        fs::create_dir_all(&config.dir).map_err(|e| StoreError::io(&config.dir, e))?;

        let mut closed = BTreeMap::new();
        let mut highest: Option<BatchId> = None;
        let now = Utc::now();

        let entries = fs::read_dir(&config.dir).map_err(|e| StoreError::io(&config.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&config.dir, e))?;
            let Some(name) = entry.file_name().to_str().and_then(BatchFileName::parse) else {
                continue;
            };
            highest = highest.max(Some(name.id));

            let path = entry.path();
            if let Some(batch) = recover_file(&config.dir, &path, name, now)? {
                closed.insert(name.id, batch);
            }
        }

        let next_seq = highest.map(|id| (id.seq() + 1) % SEQ_MODULUS).unwrap_or(0);
        info!(
            event = event_names::STORE_OPENED,
            dir = %config.dir.display(),
            closed_batches = closed.len(),
            "Opened batch store at {} ({} pending batches)",
            config.dir.display(),
            closed.len()
        );

        Ok(Arc::new(BatchStore {
            config,
            state: Mutex::new(StoreState {
                open: None,
                closed,
                next_seq,
            }),
        }))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Take the store lock for a sequence of operations.
    pub fn lock(&self) -> Result<StoreGuard<'_>, StoreError> {
        let state = self
            .state
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        Ok(StoreGuard { store: self, state })
    }

    /// Closed batches, oldest first. The open batch is never included.
    pub fn list_pending_batches(&self) -> Result<Vec<Batch>, StoreError> {
        let mut guard = self.lock()?;
        let ids = guard.pending_ids();
        let mut batches = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(batch) = guard.read_batch(id)? {
                batches.push(batch);
            }
        }
        Ok(batches)
    }

    /// Ids of closed batches, oldest first.
    pub fn pending_ids(&self) -> Result<Vec<BatchId>, StoreError> {
        Ok(self.lock()?.pending_ids())
    }

    /// Read one closed batch into memory.
    pub fn read_batch(&self, id: BatchId) -> Result<Option<Batch>, StoreError> {
        self.lock()?.read_batch(id)
    }

    /// Delete a closed batch. Deleting an unknown id is a no-op.
    pub fn delete(
        &self,
        id: BatchId,
        reason: EvictionReason,
    ) -> Result<Option<EvictionEvent>, StoreError> {
        self.lock()?.delete(id, reason, Utc::now())
    }

    /// Delete every batch, open and closed.
    pub fn purge_all(&self) -> Result<Vec<EvictionEvent>, StoreError> {
        self.lock()?.purge_all(EvictionReason::ConsentRevoked, Utc::now())
    }

    /// Delete every closed batch older than `max_age`, whatever its upload state.
    pub fn evict_expired(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<Vec<EvictionEvent>, StoreError> {
        self.lock()?.evict_expired(now, max_age)
    }

    pub fn total_bytes_on_disk(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.bytes_on_disk())
    }

    /// Close the open batch if it is older than the batch age limit.
    pub fn rotate_if_stale(&self, now: DateTime<Utc>) -> Result<Option<BatchId>, StoreError> {
        let mut guard = self.lock()?;
        let stale = guard
            .state
            .open
            .as_ref()
            .is_some_and(|open| open.id.age(now) > self.config.max_batch_age);
        if stale {
            guard.close_open()
        } else {
            Ok(None)
        }
    }

    /// Close the open batch now, making it eligible for upload.
    pub fn flush(&self) -> Result<Option<BatchId>, StoreError> {
        self.lock()?.close_open()
    }

    pub fn status(&self, now: DateTime<Utc>) -> Result<StoreStatus, StoreError> {
        let guard = self.lock()?;
        let bytes_on_disk = guard.bytes_on_disk();
        let cap = self.config.storage_cap_bytes;

        Ok(StoreStatus {
            dir: self.config.dir.clone(),
            open_batch: guard.state.open.as_ref().map(|open| OpenBatchInfo {
                batch_id: open.id,
                event_count: open.event_count,
                total_size_bytes: open.total_size_bytes,
                age_secs: open.id.age(now).as_secs(),
            }),
            closed_batches: guard.state.closed.len(),
            closed_events: guard.state.closed.values().map(|c| c.event_count).sum(),
            bytes_on_disk,
            storage_cap_bytes: cap,
            usage_percent: if cap > 0 {
                bytes_on_disk as f64 / cap as f64 * 100.0
            } else {
                0.0
            },
            oldest_batch_age_secs: guard
                .state
                .closed
                .keys()
                .next()
                .map(|id| id.age(now).as_secs()),
        })
    }
}

/// Bring one file found at startup into the closed set.
fn recover_file(
    dir: &Path,
    path: &Path,
    name: BatchFileName,
    now: DateTime<Utc>,
) -> Result<Option<ClosedBatch>, StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    let decoded = decode_records(&bytes);

    if decoded.torn_tail || decoded.skipped_lines > 0 {
        warn!(
            event = event_names::STORE_RECOVERED,
            path = %path.display(),
            skipped_lines = decoded.skipped_lines,
            torn_tail = decoded.torn_tail,
            "Skipping undecodable records in {}",
            path.display()
        );
    }

    if decoded.records.is_empty() {
        if !bytes.is_empty() {
            EvictionEvent::new(
                name.id,
                bytes.len() as u64,
                0,
                EvictionReason::Corrupted {
                    skipped_lines: decoded.skipped_lines,
                },
                now,
            )
            .log();
        }
        fs::remove_file(path).map_err(|e| StoreError::io(path, e))?;
        return Ok(None);
    }

    let closed_path = BatchFileName::closed(name.id).path_in(dir);
    if name.state == BatchFileState::Open {
        fs::rename(path, &closed_path).map_err(|e| StoreError::io(path, e))?;
        info!(
            event = event_names::STORE_RECOVERED,
            batch_id = %name.id,
            events = decoded.records.len(),
            "Closed batch {} left open by a previous process",
            name.id
        );
    }

    Ok(Some(ClosedBatch {
        path: closed_path,
        file_bytes: bytes.len() as u64,
        total_size_bytes: decoded.records.iter().map(EventRecord::size_bytes).sum(),
        event_count: decoded.records.len(),
    }))
}

/// Exclusive access to the store for a sequence of operations.
pub struct StoreGuard<'a> {
    store: &'a BatchStore,
    state: MutexGuard<'a, StoreState>,
}

impl StoreGuard<'_> {
    pub fn pending_ids(&self) -> Vec<BatchId> {
        self.state.closed.keys().copied().collect()
    }

    pub fn bytes_on_disk(&self) -> u64 {
        let closed: u64 = self.state.closed.values().map(|c| c.file_bytes).sum();
        closed + self.state.open.as_ref().map_or(0, |open| open.file_bytes)
    }

    /// Append one record durably, rotating and evicting as needed.
    pub fn append(
        &mut self,
        record: &EventRecord,
        now: DateTime<Utc>,
    ) -> Result<AppendOutcome, StoreError> {
        let store = self.store;
        let config = &store.config;
        let line = encode_record(record)?;
        let needed = line.len() as u64;

        let should_rotate = self.state.open.as_ref().is_some_and(|open| {
            let over_size =
                open.total_size_bytes + record.size_bytes() > config.max_batch_size_bytes;
            let stale = open.id.age(now) > config.max_batch_age;
            open.event_count > 0 && (over_size || stale)
        });
        let rotated = if should_rotate {
            self.close_open()?
        } else {
            None
        };

        if !self.make_room(needed, now)? {
            warn!(
                event = event_names::STORE_DROPPED,
                needed_bytes = needed,
                cap_bytes = config.storage_cap_bytes,
                "Dropping event of {} bytes: larger than the storage cap",
                needed
            );
            return Ok(AppendOutcome::DroppedOverCapacity {
                needed_bytes: needed,
                cap_bytes: config.storage_cap_bytes,
            });
        }

        let open = match self.state.open.take() {
            Some(open) => open,
            None => self.start_batch(now)?,
        };
        let open = self.state.open.insert(open);

        let written = open
            .file
            .write_all(&line)
            .and_then(|_| open.file.sync_data());
        if let Err(e) = written {
            // Drop any partial line so the file stays decodable.
            let _ = open.file.set_len(open.file_bytes);
            return Err(StoreError::io(&open.path, e));
        }

        open.file_bytes += needed;
        open.total_size_bytes += record.size_bytes();
        open.event_count += 1;

        Ok(AppendOutcome::Persisted {
            batch_id: open.id,
            rotated,
        })
    }

    /// Read one closed batch into memory.
    pub fn read_batch(&mut self, id: BatchId) -> Result<Option<Batch>, StoreError> {
        let Some(entry) = self.state.closed.get(&id) else {
            return Ok(None);
        };
        let path = entry.path.clone();

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    event = event_names::STORE_MISSING,
                    batch_id = %id,
                    "Batch file {} disappeared from disk",
                    path.display()
                );
                self.state.closed.remove(&id);
                return Ok(None);
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let decoded = decode_records(&bytes);
        if decoded.torn_tail || decoded.skipped_lines > 0 {
            warn!(
                batch_id = %id,
                skipped_lines = decoded.skipped_lines,
                torn_tail = decoded.torn_tail,
                "Skipping undecodable records in batch {}",
                id
            );
        }
        if decoded.records.is_empty() {
            self.delete(
                id,
                EvictionReason::Corrupted {
                    skipped_lines: decoded.skipped_lines,
                },
                Utc::now(),
            )?;
            return Ok(None);
        }

        Ok(Some(Batch::new(id, decoded.records)))
    }

    /// Delete a closed batch. Unknown ids (and the open batch) are a no-op.
    pub fn delete(
        &mut self,
        id: BatchId,
        reason: EvictionReason,
        now: DateTime<Utc>,
    ) -> Result<Option<EvictionEvent>, StoreError> {
        let Some(entry) = self.state.closed.remove(&id) else {
            return Ok(None);
        };

        let event = EvictionEvent::new(id, entry.file_bytes, entry.event_count, reason, now);
        event.log();

        match fs::remove_file(&entry.path) {
            Ok(()) => Ok(Some(event)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Some(event)),
            Err(e) => {
                let path = entry.path.clone();
                self.state.closed.insert(id, entry);
                Err(StoreError::io(path, e))
            }
        }
    }

    /// Delete every batch, including the open one.
    ///
    /// Keeps going past individual failures and reports the first one.
    pub fn purge_all(
        &mut self,
        reason: EvictionReason,
        now: DateTime<Utc>,
    ) -> Result<Vec<EvictionEvent>, StoreError> {
        let mut events = Vec::new();
        let mut first_error = None;

        if let Some(open) = self.state.open.take() {
            let event = EvictionEvent::new(
                open.id,
                open.file_bytes,
                open.event_count,
                reason.clone(),
                now,
            );
            event.log();
            drop(open.file);
            match fs::remove_file(&open.path) {
                Ok(()) => events.push(event),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => events.push(event),
                Err(e) => first_error = Some(StoreError::io(&open.path, e)),
            }
        }

        for id in self.pending_ids() {
            match self.delete(id, reason.clone(), now) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(events),
        }
    }

    /// Delete closed batches strictly older than `max_age`.
    pub fn evict_expired(
        &mut self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<Vec<EvictionEvent>, StoreError> {
        let expired = expired_ids(self.state.closed.keys(), now, max_age);
        let reason = EvictionReason::Expired {
            max_age_secs: max_age.as_secs(),
        };

        let mut events = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(event) = self.delete(id, reason.clone(), now)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Close the open batch. An empty open batch is simply removed.
    pub fn close_open(&mut self) -> Result<Option<BatchId>, StoreError> {
        let Some(open) = self.state.open.take() else {
            return Ok(None);
        };

        if open.event_count == 0 {
            drop(open.file);
            fs::remove_file(&open.path).map_err(|e| StoreError::io(&open.path, e))?;
            return Ok(None);
        }

        let closed_path = BatchFileName::closed(open.id).path_in(&self.store.config.dir);
        let result = open
            .file
            .sync_all()
            .and_then(|_| fs::rename(&open.path, &closed_path));
        if let Err(e) = result {
            let path = open.path.clone();
            self.state.open = Some(open);
            return Err(StoreError::io(path, e));
        }

        debug!(
            event = event_names::STORE_ROTATED,
            batch_id = %open.id,
            event_count = open.event_count,
            total_size_bytes = open.total_size_bytes,
            "Closed batch {} ({} events, {} bytes)",
            open.id,
            open.event_count,
            open.total_size_bytes
        );

        self.state.closed.insert(
            open.id,
            ClosedBatch {
                path: closed_path,
                file_bytes: open.file_bytes,
                total_size_bytes: open.total_size_bytes,
                event_count: open.event_count,
            },
        );
        Ok(Some(open.id))
    }

    /// Evict oldest-first until `needed` more bytes fit under the cap.
    ///
    /// Returns false (evicting nothing) when the data cannot fit even in an
    /// empty store.
    fn make_room(&mut self, needed: u64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let cap = self.store.config.storage_cap_bytes;
        let used = self.bytes_on_disk();
        if used.saturating_add(needed) <= cap {
            return Ok(true);
        }

        let mut candidates: Vec<(BatchId, u64)> = self
            .state
            .closed
            .iter()
            .map(|(id, c)| (*id, c.file_bytes))
            .collect();
        let open = self
            .state
            .open
            .as_ref()
            .filter(|open| open.event_count > 0)
            .map(|open| (open.id, open.file_bytes));
        candidates.extend(open);

        let (victims, fits) = capacity_victims(candidates, used, needed, cap);
        if !fits {
            return Ok(false);
        }

        let reason = EvictionReason::OverCapacity {
            cap_bytes: cap,
            used_bytes: used,
            needed_bytes: needed,
        };
        for id in victims {
            if open.is_some_and(|(open_id, _)| open_id == id) {
                self.close_open()?;
            }
            self.delete(id, reason.clone(), now)?;
        }
        Ok(true)
    }

    fn start_batch(&mut self, now: DateTime<Utc>) -> Result<OpenBatch, StoreError> {
        let mut id = BatchId::new(now, self.state.next_seq);
        while self.state.closed.contains_key(&id) {
            id = BatchId::new(now, (id.seq() + 1) % SEQ_MODULUS);
        }
        self.state.next_seq = (id.seq() + 1) % SEQ_MODULUS;

        let path = BatchFileName::open(id).path_in(&self.store.config.dir);
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        debug!(event = event_names::STORE_BATCH_OPENED, batch_id = %id, "Opened batch {}", id);
        Ok(OpenBatch {
            id,
            path,
            file,
            total_size_bytes: 0,
            file_bytes: 0,
            event_count: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
    }

    fn open_store(dir: &TempDir, max_batch: u64) -> Arc<BatchStore> {
        BatchStore::open(
            StoreConfig::new(dir.path())
                .with_max_batch_size(max_batch)
                .with_max_batch_age(Duration::from_secs(10))
                .with_storage_cap(1024 * 1024),
        )
        .unwrap()
    }

    fn append(store: &BatchStore, size: usize, now: DateTime<Utc>) -> AppendOutcome {
        let record = EventRecord::with_timestamp(vec![b'x'; size], now);
        store.lock().unwrap().append(&record, now).unwrap()
    }

    #[test]
    fn test_open_batch_is_not_pending() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 100);
        append(&store, 10, ts(0));
        assert!(store.pending_ids().unwrap().is_empty());
        assert!(store.total_bytes_on_disk().unwrap() > 0);

        let closed = store.flush().unwrap();
        assert!(closed.is_some());
        assert_eq!(store.pending_ids().unwrap(), vec![closed.unwrap()]);
    }

    #[test]
    fn test_rotation_on_size() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 25);
        let first = append(&store, 10, ts(0));
        append(&store, 10, ts(0));
        let third = append(&store, 30, ts(0));

        let AppendOutcome::Persisted { batch_id, .. } = first else {
            panic!("expected persisted");
        };
        match third {
            AppendOutcome::Persisted { rotated, .. } => assert_eq!(rotated, Some(batch_id)),
            other => panic!("unexpected {:?}", other),
        }
        let batch = store.read_batch(batch_id).unwrap().unwrap();
        assert_eq!(batch.total_size_bytes, 20);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_rotate_if_stale() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 1000);
        append(&store, 5, ts(0));
        assert_eq!(store.rotate_if_stale(ts(10)).unwrap(), None);
        assert!(store.rotate_if_stale(ts(11)).unwrap().is_some());
        assert_eq!(store.pending_ids().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 1000);
        append(&store, 5, ts(0));
        let id = store.flush().unwrap().unwrap();

        let event = store.delete(id, EvictionReason::Uploaded).unwrap();
        assert_eq!(event.unwrap().event_count, 1);
        assert!(store.delete(id, EvictionReason::Uploaded).unwrap().is_none());
        assert_eq!(store.total_bytes_on_disk().unwrap(), 0);
    }

    #[test]
    fn test_sequence_resumes_after_reopen() {
        let dir = TempDir::new().unwrap();
        let first_id = {
            let store = open_store(&dir, 1000);
            append(&store, 5, ts(0));
            store.flush().unwrap().unwrap()
        };

        let store = open_store(&dir, 1000);
        append(&store, 5, ts(0));
        let second_id = store.flush().unwrap().unwrap();
        assert!(second_id > first_id);
        assert_eq!(second_id.seq(), first_id.seq() + 1);
    }

    #[test]
    fn test_status_reports_usage() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 1000);
        append(&store, 5, ts(0));
        store.flush().unwrap();
        append(&store, 7, ts(3));

        let status = store.status(ts(5)).unwrap();
        assert_eq!(status.closed_batches, 1);
        assert_eq!(status.closed_events, 1);
        assert_eq!(status.oldest_batch_age_secs, Some(5));
        let open = status.open_batch.unwrap();
        assert_eq!(open.total_size_bytes, 7);
        assert_eq!(open.age_secs, 2);
        assert!(status.usage_percent > 0.0);
    }

    #[test]
    fn test_strays_are_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("consent.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let store = open_store(&dir, 1000);
        assert!(store.pending_ids().unwrap().is_empty());
        assert!(dir.path().join("consent.json").exists());
    }
}
