//! Batch model, file naming and the batch file codec.
//!
//! A batch file is append-only JSONL, one record per line:
//!
//! ```text
//! {"created_at":"2026-10-16T09:00:00.123Z","size_bytes":10,"payload":"eyJzcGFuIjoxfQ=="}
//! ```
//!
//! Payloads are opaque bytes and are stored base64-encoded. A line is only
//! acknowledged once it has been written and synced, so after a crash the
//! last line may be torn; the decoder skips it.

use std::path::{Path, PathBuf};

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tq_common::BatchId;

use crate::record::EventRecord;

/// Extension of the batch currently accepting appends.
pub const OPEN_EXTENSION: &str = "open";

/// Extension of rotated-out batches.
pub const CLOSED_EXTENSION: &str = "batch";

/// A closed batch read back from disk: the atomic unit of upload and deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub id: BatchId,
    /// Events in capture order.
    pub events: Vec<EventRecord>,
    /// Sum of the event sizes.
    pub total_size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(id: BatchId, events: Vec<EventRecord>) -> Self {
        let total_size_bytes = events.iter().map(EventRecord::size_bytes).sum();
        Batch {
            id,
            events,
            total_size_bytes,
            created_at: id.created_at(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Whether a batch file still accepts appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFileState {
    Open,
    Closed,
}

impl BatchFileState {
    pub fn extension(&self) -> &'static str {
        match self {
            BatchFileState::Open => OPEN_EXTENSION,
            BatchFileState::Closed => CLOSED_EXTENSION,
        }
    }
}

/// Parsed name of a file in the batch directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchFileName {
    pub id: BatchId,
    pub state: BatchFileState,
}

impl BatchFileName {
    pub fn open(id: BatchId) -> Self {
        BatchFileName {
            id,
            state: BatchFileState::Open,
        }
    }

    pub fn closed(id: BatchId) -> Self {
        BatchFileName {
            id,
            state: BatchFileState::Closed,
        }
    }

    /// Parse a directory entry name. Returns None for anything that is not a
    /// batch file (consent state, temp files, strays).
    pub fn parse(file_name: &str) -> Option<Self> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        let state = match ext {
            OPEN_EXTENSION => BatchFileState::Open,
            CLOSED_EXTENSION => BatchFileState::Closed,
            _ => return None,
        };
        Some(BatchFileName {
            id: BatchId::parse(stem)?,
            state,
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.id, self.state.extension())
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

#[derive(Serialize, Deserialize)]
struct RecordLine {
    created_at: DateTime<Utc>,
    size_bytes: u64,
    payload: String,
}

/// Encode one record as a newline-terminated line.
pub fn encode_record(record: &EventRecord) -> Result<Vec<u8>, serde_json::Error> {
    let line = RecordLine {
        created_at: record.created_at(),
        size_bytes: record.size_bytes(),
        payload: base64::engine::general_purpose::STANDARD.encode(record.payload()),
    };
    let mut bytes = serde_json::to_vec(&line)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Result of decoding a batch file.
#[derive(Debug, Default)]
pub struct DecodedRecords {
    pub records: Vec<EventRecord>,
    /// Complete lines that failed to decode.
    pub skipped_lines: usize,
    /// Whether the file ended in an unterminated line.
    pub torn_tail: bool,
}

/// Decode the contents of a batch file. Never fails: undecodable lines are
/// counted and skipped.
pub fn decode_records(bytes: &[u8]) -> DecodedRecords {
    let mut decoded = DecodedRecords::default();
    let mut rest = bytes;

    while !rest.is_empty() {
        let Some(end) = rest.iter().position(|b| *b == b'\n') else {
            decoded.torn_tail = true;
            break;
        };
        let line = &rest[..end];
        rest = &rest[end + 1..];

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match decode_line(line) {
            Some(record) => decoded.records.push(record),
            None => decoded.skipped_lines += 1,
        }
    }

    decoded
}

fn decode_line(line: &[u8]) -> Option<EventRecord> {
    let parsed: RecordLine = serde_json::from_slice(line).ok()?;
    let payload = base64::engine::general_purpose::STANDARD
        .decode(parsed.payload.as_bytes())
        .ok()?;
    if payload.len() as u64 != parsed.size_bytes {
        return None;
    }
    Some(EventRecord::with_timestamp(payload, parsed.created_at))
}
