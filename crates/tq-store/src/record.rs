//! The unit of data produced by instrumentation.

use chrono::{DateTime, Utc};

/// One serialized span, log or telemetry event.
///
/// Immutable once created; `size_bytes` always equals the payload length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl EventRecord {
    /// Create a record stamped with the current time.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self::with_timestamp(payload, Utc::now())
    }

    /// Create a record with an explicit capture time.
    pub fn with_timestamp(payload: impl Into<Vec<u8>>, created_at: DateTime<Utc>) -> Self {
        EventRecord {
            payload: payload.into(),
            created_at,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn size_bytes(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
