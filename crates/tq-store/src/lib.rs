//! tracequeue batch storage.
//!
//! This crate provides:
//! - The event record model and the batch file codec
//! - `BatchStore`: the inventory of batch files on disk
//! - `BatchWriter`: consent-gated, durable appends with size/age rotation
//! - Retention: age and capacity eviction with explicit eviction events
//! - `ConsentGate`: the persisted process-wide consent state
//!
//! The batch directory layout is flat:
//!
//! ```text
//! <dir>/
//!   0001760600000000-00000000.batch   closed, eligible for upload
//!   0001760600004211-00000001.open    the open batch (at most one)
//!   consent.json                      last explicit consent decision
//! ```

pub mod batch;
pub mod consent;
pub mod error;
pub mod event_names;
pub mod record;
pub mod retention;
pub mod store;
pub mod writer;

pub use batch::{decode_records, encode_record, Batch, BatchFileName, BatchFileState, DecodedRecords};
pub use consent::ConsentGate;
pub use error::StoreError;
pub use record::EventRecord;
pub use retention::{EvictionEvent, EvictionReason};
pub use store::{BatchStore, OpenBatchInfo, StoreConfig, StoreGuard, StoreStatus};
pub use writer::{AppendOutcome, BatchWriter, WriterStats};
