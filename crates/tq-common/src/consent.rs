//! Data-collection consent state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-wide consent for collecting and sending telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    /// No decision yet: buffer locally, never send.
    #[default]
    Pending,
    /// Buffer and send.
    Granted,
    /// Neither buffer nor send; stored data is purged.
    NotGranted,
}

impl ConsentState {
    /// Whether new events may be written to disk.
    pub fn allows_persistence(&self) -> bool {
        !matches!(self, ConsentState::NotGranted)
    }

    /// Whether stored batches may leave the device.
    pub fn allows_upload(&self) -> bool {
        matches!(self, ConsentState::Granted)
    }
}

impl fmt::Display for ConsentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsentState::Pending => write!(f, "pending"),
            ConsentState::Granted => write!(f, "granted"),
            ConsentState::NotGranted => write!(f, "not_granted"),
        }
    }
}

impl std::str::FromStr for ConsentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(ConsentState::Pending),
            "granted" | "yes" => Ok(ConsentState::Granted),
            "not_granted" | "notgranted" | "denied" | "no" => Ok(ConsentState::NotGranted),
            _ => Err(format!("unknown consent state: {}", s)),
        }
    }
}
