//! No-mock batch storage tests against a real temp directory.
//!
//! Validates:
//! - Size rotation (10/10/30 scenario, oversized event alone in its batch)
//! - Pending consent buffering and purge on revocation
//! - Age eviction regardless of upload state
//! - Capacity eviction oldest-first
//! - Crash recovery of open batches and torn tails
//! - No loss and no duplication across arbitrary append sequences

use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use tempfile::TempDir;
use tq_common::ConsentState;
use tq_store::{
    AppendOutcome, BatchStore, BatchWriter, ConsentGate, EventRecord, EvictionReason, StoreConfig,
};

// ============================================================================
// Helpers
// ============================================================================

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_760_600_000 + secs, 0).unwrap()
}

fn open(dir: &TempDir, config: impl FnOnce(StoreConfig) -> StoreConfig) -> Arc<BatchStore> {
    let base = StoreConfig::new(dir.path())
        .with_max_batch_size(25)
        .with_max_batch_age(Duration::from_secs(10))
        .with_max_retention_age(Duration::from_secs(3600))
        .with_storage_cap(1 << 20);
    BatchStore::open(config(base)).expect("open store")
}

fn writer(store: &Arc<BatchStore>, consent: ConsentState) -> BatchWriter {
    let gate = ConsentGate::open(store.clone(), consent).expect("open gate");
    BatchWriter::new(store.clone(), gate)
}

fn event(size: usize, tag: u8, at: DateTime<Utc>) -> EventRecord {
    EventRecord::with_timestamp(vec![tag; size], at)
}

fn sizes(store: &BatchStore) -> Vec<Vec<u64>> {
    store
        .list_pending_batches()
        .unwrap()
        .iter()
        .map(|b| b.events.iter().map(EventRecord::size_bytes).collect())
        .collect()
}

// ============================================================================
// Rotation
// ============================================================================

#[test]
fn ten_ten_thirty_rotates_into_two_batches() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, |c| c);
    let writer = writer(&store, ConsentState::Granted);

    assert!(writer.append_at(event(10, 1, ts(0)), ts(0)).is_persisted());
    assert!(writer.append_at(event(10, 2, ts(0)), ts(0)).is_persisted());
    assert!(writer.append_at(event(30, 3, ts(0)), ts(0)).is_persisted());
    store.flush().unwrap();

    let batches = store.list_pending_batches().unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].total_size_bytes, 20);
    assert_eq!(batches[0].events[0].payload(), &[1u8; 10][..]);
    assert_eq!(batches[0].events[1].payload(), &[2u8; 10][..]);
    assert_eq!(batches[1].total_size_bytes, 30);
    assert_eq!(batches[1].len(), 1);
    assert!(batches[0].id < batches[1].id);
}

#[test]
fn oversized_event_is_followed_by_a_fresh_batch() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, |c| c);
    let writer = writer(&store, ConsentState::Granted);

    writer.append_at(event(100, 1, ts(0)), ts(0));
    let outcome = writer.append_at(event(5, 2, ts(0)), ts(0));
    match outcome {
        AppendOutcome::Persisted { rotated, .. } => assert!(rotated.is_some()),
        other => panic!("unexpected outcome {:?}", other),
    }
    store.flush().unwrap();
    assert_eq!(sizes(&store), vec![vec![100], vec![5]]);
}

#[test]
fn stale_open_batch_rotates_on_next_append() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, |c| c);
    let writer = writer(&store, ConsentState::Granted);

    writer.append_at(event(1, 1, ts(0)), ts(0));
    writer.append_at(event(1, 2, ts(11)), ts(11));
    assert_eq!(store.pending_ids().unwrap().len(), 1);
    assert_eq!(sizes(&store), vec![vec![1]]);
}

// ============================================================================
// Consent
// ============================================================================

#[test]
fn pending_events_become_uploadable_after_grant() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, |c| c.with_max_batch_size(1000));
    let writer = writer(&store, ConsentState::Pending);

    writer.append_at(event(4, 1, ts(0)), ts(0));
    writer.append_at(event(4, 2, ts(1)), ts(1));
    writer.gate().set_state(ConsentState::Granted).unwrap();

    assert!(store.rotate_if_stale(ts(11)).unwrap().is_some());
    let batches = store.list_pending_batches().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
}

#[test]
fn revocation_empties_store_and_blocks_appends() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, |c| c);
    let writer = writer(&store, ConsentState::Granted);

    for i in 0..5u8 {
        writer.append_at(event(10, i, ts(0)), ts(0));
    }
    assert!(store.total_bytes_on_disk().unwrap() > 0);

    writer.gate().set_state(ConsentState::NotGranted).unwrap();
    assert_eq!(store.total_bytes_on_disk().unwrap(), 0);
    assert!(store.list_pending_batches().unwrap().is_empty());

    let outcome = writer.append_at(event(10, 9, ts(1)), ts(1));
    assert_eq!(outcome, AppendOutcome::DiscardedNoConsent);
    assert_eq!(store.total_bytes_on_disk().unwrap(), 0);

    writer.gate().set_state(ConsentState::Granted).unwrap();
    assert!(writer.append_at(event(10, 9, ts(2)), ts(2)).is_persisted());
}

// ============================================================================
// Retention
// ============================================================================

#[test]
fn evict_expired_removes_only_old_closed_batches() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, |c| c);
    let writer = writer(&store, ConsentState::Granted);

    writer.append_at(event(20, 1, ts(0)), ts(0));
    writer.append_at(event(20, 2, ts(100)), ts(100));
    writer.append_at(event(20, 3, ts(200)), ts(200));

    // Batch 1 and 2 are closed; batch 3 is open.
    let events = store.evict_expired(ts(200), Duration::from_secs(150)).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].age_secs, 200);
    assert!(matches!(events[0].reason, EvictionReason::Expired { max_age_secs: 150 }));

    assert_eq!(sizes(&store), vec![vec![20]]);
    assert!(store.status(ts(200)).unwrap().open_batch.is_some());
}

#[test]
fn storage_cap_evicts_oldest_first() {
    let dir = TempDir::new().unwrap();
    let line_len = tq_store::encode_record(&event(20, 0, ts(0))).unwrap().len() as u64;
    let store = open(&dir, |c| c.with_storage_cap(line_len * 3));
    let writer = writer(&store, ConsentState::Granted);

    for i in 0..3u8 {
        writer.append_at(event(20, i, ts(i as i64)), ts(i as i64));
    }
    assert_eq!(store.total_bytes_on_disk().unwrap(), line_len * 3);

    assert!(writer.append_at(event(20, 3, ts(3)), ts(3)).is_persisted());
    assert_eq!(store.total_bytes_on_disk().unwrap(), line_len * 3);

    store.flush().unwrap();
    let batches = store.list_pending_batches().unwrap();
    let tags: Vec<u8> = batches.iter().map(|b| b.events[0].payload()[0]).collect();
    assert_eq!(tags, vec![1, 2, 3]);
}

// ============================================================================
// Crash recovery
// ============================================================================

#[test]
fn open_batch_is_recovered_after_restart() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(&dir, |c| c.with_max_batch_size(1000));
        let writer = writer(&store, ConsentState::Granted);
        writer.append_at(event(5, 1, ts(0)), ts(0));
        writer.append_at(event(5, 2, ts(0)), ts(0));
        // Dropped without flush: simulates a crash.
    }

    let store = open(&dir, |c| c);
    let batches = store.list_pending_batches().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
}

#[test]
fn torn_tail_is_skipped_on_recovery() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(&dir, |c| c.with_max_batch_size(1000));
        let writer = writer(&store, ConsentState::Granted);
        writer.append_at(event(5, 1, ts(0)), ts(0));
    }

    let open_file = fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .find(|p| p.extension().and_then(|e| e.to_str()) == Some("open"))
        .expect("open batch file");
    let mut file = fs::OpenOptions::new().append(true).open(&open_file).unwrap();
    file.write_all(br#"{"created_at":"2026-10-16T00:00:00Z","size_b"#)
        .unwrap();
    drop(file);

    let store = open(&dir, |c| c);
    let batches = store.list_pending_batches().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].events[0].payload(), &[1u8; 5][..]);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Every persisted event lands in exactly one batch, in capture order.
    #[test]
    fn appends_are_neither_lost_nor_duplicated(
        ops in prop::collection::vec((1usize..40, 0i64..4), 1..60),
        max_batch in 10u64..80,
    ) {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, |c| c.with_max_batch_size(max_batch));
        let writer = writer(&store, ConsentState::Granted);

        let mut clock = 0i64;
        let mut expected = Vec::new();
        for (i, (size, advance)) in ops.iter().enumerate() {
            clock += advance;
            let mut payload = (i as u32).to_be_bytes().to_vec();
            payload.resize((*size).max(4), 0);
            expected.push(payload.clone());
            let outcome = writer.append_at(EventRecord::with_timestamp(payload, ts(clock)), ts(clock));
            prop_assert!(outcome.is_persisted());
        }
        store.flush().unwrap();

        let batches = store.list_pending_batches().unwrap();
        let seen: Vec<Vec<u8>> = batches
            .iter()
            .flat_map(|b| b.events.iter().map(|e| e.payload().to_vec()))
            .collect();
        prop_assert_eq!(seen, expected);

        for batch in &batches {
            prop_assert_eq!(
                batch.total_size_bytes,
                batch.events.iter().map(EventRecord::size_bytes).sum::<u64>()
            );
            prop_assert!(batch.total_size_bytes <= max_batch || batch.len() == 1);
        }
    }
}
