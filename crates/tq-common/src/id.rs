//! Batch identity types.
//!
//! A batch is identified by the millisecond it was opened plus a per-store
//! sequence number. The textual form sorts lexicographically in creation
//! order, so a directory listing is enough to recover the order after a
//! restart.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of the zero-padded millisecond component.
const MILLIS_WIDTH: usize = 16;

/// Width of the zero-padded sequence component.
const SEQ_WIDTH: usize = 8;

/// Identifier of one batch.
///
/// Format: `<created_at_ms:016>-<seq:08>`
/// Example: `0001760600000000-00000003`
///
/// Ordering is by creation time, then by sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BatchId {
    created_at_ms: i64,
    seq: u32,
}

impl BatchId {
    /// Create an id for a batch opened at `created_at`.
    pub fn new(created_at: DateTime<Utc>, seq: u32) -> Self {
        BatchId {
            created_at_ms: created_at.timestamp_millis().max(0),
            seq,
        }
    }

    /// Creation time encoded in the id.
    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.created_at_ms)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    /// Per-store sequence number.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Age of the batch relative to `now`. Never negative.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.created_at()).to_std().unwrap_or_default()
    }

    /// Parse the textual form produced by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != MILLIS_WIDTH + 1 + SEQ_WIDTH {
            return None;
        }
        let (millis, rest) = s.split_at(MILLIS_WIDTH);
        let seq = rest.strip_prefix('-')?;
        if !millis.chars().all(|c| c.is_ascii_digit()) || !seq.chars().all(|c| c.is_ascii_digit())
        {
            return None;
        }
        Some(BatchId {
            created_at_ms: millis.parse().ok()?,
            seq: seq.parse().ok()?,
        })
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:0mw$}-{:0sw$}",
            self.created_at_ms,
            self.seq,
            mw = MILLIS_WIDTH,
            sw = SEQ_WIDTH
        )
    }
}

impl TryFrom<String> for BatchId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        BatchId::parse(&value).ok_or_else(|| format!("invalid batch id: {}", value))
    }
}

impl From<BatchId> for String {
    fn from(id: BatchId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_batch_id_format() {
        let id = BatchId::new(ts(1_760_600_000_123), 7);
        assert_eq!(id.to_string(), "0001760600000123-00000007");
    }

    #[test]
    fn test_batch_id_parse() {
        let id = BatchId::parse("0001760600000123-00000007").unwrap();
        assert_eq!(id.created_at_ms(), 1_760_600_000_123);
        assert_eq!(id.seq(), 7);
        assert_eq!(id.created_at(), ts(1_760_600_000_123));
    }

    #[test]
    fn test_batch_id_parse_rejects_garbage() {
        assert!(BatchId::parse("").is_none());
        assert!(BatchId::parse("0001760600000123_00000007").is_none());
        assert!(BatchId::parse("000176060000012a-00000007").is_none());
        assert!(BatchId::parse("1760600000123-7").is_none());
    }

    #[test]
    fn test_batch_id_ordering_by_time_then_seq() {
        let a = BatchId::new(ts(1000), 5);
        let b = BatchId::new(ts(1000), 6);
        let c = BatchId::new(ts(2000), 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_batch_id_age_never_negative() {
        let id = BatchId::new(ts(10_000), 0);
        assert_eq!(id.age(ts(5_000)), std::time::Duration::ZERO);
        assert_eq!(
            id.age(ts(10_000) + Duration::seconds(3)),
            std::time::Duration::from_secs(3)
        );
    }

    #[test]
    fn test_batch_id_serde_as_string() {
        let id = BatchId::new(ts(42), 1);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"0000000000000042-00000001\"");
        let back: BatchId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    proptest! {
        #[test]
        fn text_order_matches_id_order(
            a_ms in 0i64..4_000_000_000_000,
            a_seq in 0u32..99_999_999,
            b_ms in 0i64..4_000_000_000_000,
            b_seq in 0u32..99_999_999,
        ) {
            let a = BatchId::new(ts(a_ms), a_seq);
            let b = BatchId::new(ts(b_ms), b_seq);
            prop_assert_eq!(a.cmp(&b), a.to_string().cmp(&b.to_string()));
        }
    }
}
