//! Process-wide consent gate.
//!
//! The gate is an explicit shared handle: every reader holds an
//! `Arc<ConsentGate>`. Transitions are serialized with appends through the
//! store lock, so no event can be persisted after a revocation has purged
//! the store.
//!
//! The last explicit decision is persisted to `consent.json` in the batch
//! directory; the configured initial state applies only when no decision
//! has been recorded.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tq_common::ConsentState;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::event_names;
use crate::retention::{EvictionEvent, EvictionReason};
use crate::store::BatchStore;

/// File holding the persisted consent decision.
pub const CONSENT_FILENAME: &str = "consent.json";

#[derive(Debug, Serialize, Deserialize)]
struct PersistedConsent {
    state: ConsentState,
    updated_at: DateTime<Utc>,
}

fn encode(state: ConsentState) -> u8 {
    match state {
        ConsentState::Pending => 0,
        ConsentState::Granted => 1,
        ConsentState::NotGranted => 2,
    }
}

fn decode(raw: u8) -> ConsentState {
    match raw {
        1 => ConsentState::Granted,
        2 => ConsentState::NotGranted,
        _ => ConsentState::Pending,
    }
}

/// Tracks consent and applies its side effects to the store.
pub struct ConsentGate {
    store: Arc<BatchStore>,
    state: AtomicU8,
    revocations: AtomicU64,
    path: PathBuf,
}

impl ConsentGate {
    /// Open the gate for `store`, restoring a persisted decision if present.
    ///
    /// A restored `NotGranted` purges whatever is on disk.
    pub fn open(store: Arc<BatchStore>, initial: ConsentState) -> Result<Arc<Self>, StoreError> {
        let path = store.dir().join(CONSENT_FILENAME);
        let state = match load_persisted(&path) {
            Some(persisted) => persisted.state,
            None => initial,
        };

        let gate = Arc::new(ConsentGate {
            store,
            state: AtomicU8::new(encode(state)),
            revocations: AtomicU64::new(0),
            path,
        });

        if state == ConsentState::NotGranted {
            gate.store.purge_all()?;
        }
        info!(event = event_names::CONSENT_LOADED, state = %state, "Consent is {}", state);
        Ok(gate)
    }

    pub fn current_state(&self) -> ConsentState {
        decode(self.state.load(Ordering::Acquire))
    }

    /// Number of times consent has left `Granted` or entered `NotGranted`.
    ///
    /// An upload that observes a different value before and after its send
    /// was cancelled by a revocation.
    pub fn revocation_epoch(&self) -> u64 {
        self.revocations.load(Ordering::Acquire)
    }

    /// Change consent.
    ///
    /// Moving to `NotGranted` purges every stored batch, open and closed,
    /// before returning.
    pub fn set_state(&self, new: ConsentState) -> Result<Vec<EvictionEvent>, StoreError> {
        let mut guard = self.store.lock()?;
        let old = decode(self.state.swap(encode(new), Ordering::AcqRel));

        let revoked = (old == ConsentState::Granted && new != ConsentState::Granted)
            || new == ConsentState::NotGranted;
        if revoked {
            self.revocations.fetch_add(1, Ordering::AcqRel);
        }

        let purged = if new == ConsentState::NotGranted {
            guard.purge_all(EvictionReason::ConsentRevoked, Utc::now())?
        } else {
            Vec::new()
        };

        // Written under the store lock so the file follows the order in
        // which transitions were applied.
        if let Err(e) = self.persist(new) {
            warn!(
                event = event_names::CONSENT_PERSIST_FAILED,
                error = %e,
                "Failed to persist consent state: {}",
                e
            );
        }
        drop(guard);

        if old != new {
            info!(
                event = event_names::CONSENT_CHANGED,
                from = %old,
                to = %new,
                purged_batches = purged.len(),
                "Consent changed from {} to {}",
                old,
                new
            );
        }
        Ok(purged)
    }

    /// The store this gate guards.
    pub fn store(&self) -> &Arc<BatchStore> {
        &self.store
    }

    fn persist(&self, state: ConsentState) -> Result<(), StoreError> {
        let temp_path = self.path.with_extension("tmp");
        let file = File::create(&temp_path).map_err(|e| StoreError::io(&temp_path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(
            &mut writer,
            &PersistedConsent {
                state,
                updated_at: Utc::now(),
            },
        )?;
        let file = writer
            .into_inner()
            .map_err(|e| StoreError::io(&temp_path, e.into_error()))?;
        file.sync_all().map_err(|e| StoreError::io(&temp_path, e))?;
        fs::rename(&temp_path, &self.path).map_err(|e| StoreError::io(&self.path, e))?;
        Ok(())
    }
}

fn load_persisted(path: &Path) -> Option<PersistedConsent> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(persisted) => Some(persisted),
        Err(e) => {
            warn!(
                path = %path.display(),
                "Ignoring unreadable consent file: {}",
                e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EventRecord;
    use crate::store::StoreConfig;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> Arc<BatchStore> {
        BatchStore::open(StoreConfig::new(dir.path())).unwrap()
    }

    #[test]
    fn test_initial_state_used_without_file() {
        let dir = TempDir::new().unwrap();
        let gate = ConsentGate::open(store_in(&dir), ConsentState::Pending).unwrap();
        assert_eq!(gate.current_state(), ConsentState::Pending);
        assert_eq!(gate.revocation_epoch(), 0);
    }

    #[test]
    fn test_decision_survives_restart() {
        let dir = TempDir::new().unwrap();
        {
            let gate = ConsentGate::open(store_in(&dir), ConsentState::Pending).unwrap();
            gate.set_state(ConsentState::Granted).unwrap();
        }
        let gate = ConsentGate::open(store_in(&dir), ConsentState::Pending).unwrap();
        assert_eq!(gate.current_state(), ConsentState::Granted);
    }

    #[test]
    fn test_revocation_epoch_advances() {
        let dir = TempDir::new().unwrap();
        let gate = ConsentGate::open(store_in(&dir), ConsentState::Pending).unwrap();
        gate.set_state(ConsentState::Granted).unwrap();
        assert_eq!(gate.revocation_epoch(), 0);
        gate.set_state(ConsentState::Pending).unwrap();
        assert_eq!(gate.revocation_epoch(), 1);
        gate.set_state(ConsentState::NotGranted).unwrap();
        assert_eq!(gate.revocation_epoch(), 2);
    }

    #[test]
    fn test_not_granted_purges_open_and_closed() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let gate = ConsentGate::open(store.clone(), ConsentState::Granted).unwrap();
        let now = Utc::now();
        {
            let mut guard = store.lock().unwrap();
            guard.append(&EventRecord::new(b"one".to_vec()), now).unwrap();
            guard.close_open().unwrap();
            guard.append(&EventRecord::new(b"two".to_vec()), now).unwrap();
        }

        let purged = gate.set_state(ConsentState::NotGranted).unwrap();
        assert_eq!(purged.len(), 2);
        assert!(purged
            .iter()
            .all(|e| e.reason == EvictionReason::ConsentRevoked));
        assert_eq!(store.total_bytes_on_disk().unwrap(), 0);
        assert!(dir.path().join(CONSENT_FILENAME).exists());
    }

    #[test]
    fn test_concurrent_transitions_persist_the_final_state() {
        let dir = TempDir::new().unwrap();
        for _ in 0..50 {
            let gate = ConsentGate::open(store_in(&dir), ConsentState::Pending).unwrap();
            std::thread::scope(|s| {
                s.spawn(|| gate.set_state(ConsentState::NotGranted).unwrap());
                s.spawn(|| gate.set_state(ConsentState::Granted).unwrap());
            });
            let in_memory = gate.current_state();
            drop(gate);

            let reopened = ConsentGate::open(store_in(&dir), ConsentState::Pending).unwrap();
            assert_eq!(reopened.current_state(), in_memory);
        }
    }

    #[test]
    fn test_persisted_not_granted_purges_on_open() {
        let dir = TempDir::new().unwrap();
        {
            let store = store_in(&dir);
            let gate = ConsentGate::open(store.clone(), ConsentState::Pending).unwrap();
            gate.set_state(ConsentState::NotGranted).unwrap();
        }
        // Simulate a batch file left behind by an older build.
        let stale = EventRecord::new(b"stale".to_vec());
        let mut line = crate::batch::encode_record(&stale).unwrap();
        line.extend(crate::batch::encode_record(&stale).unwrap());
        fs::write(dir.path().join("0000000000001000-00000000.batch"), line).unwrap();

        let store = store_in(&dir);
        assert_eq!(store.pending_ids().unwrap().len(), 1);
        let gate = ConsentGate::open(store.clone(), ConsentState::Granted).unwrap();
        assert_eq!(gate.current_state(), ConsentState::NotGranted);
        assert!(store.pending_ids().unwrap().is_empty());
    }
}
