//! Error types for tracequeue.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for retry decisions
//!
//! None of these errors ever reach instrumentation call sites: the pipeline
//! absorbs them into diagnostics. They surface only through the CLI and the
//! library APIs that operate on the store directly.
//!
//! # Agent-Facing Output
//!
//! Errors serialize to structured JSON:
//! ```json
//! {
//!   "code": 31,
//!   "category": "transport",
//!   "message": "payload rejected (HTTP 400): malformed batch",
//!   "recoverable": false
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consent::ConsentState;

/// Result type alias for tracequeue operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file errors.
    Config,
    /// Batch persistence errors.
    Storage,
    /// Upload errors.
    Transport,
    /// Consent violations.
    Consent,
    /// File I/O and serialization errors.
    Io,
    /// Bugs: poisoned locks, broken invariants.
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Transport => write!(f, "transport"),
            ErrorCategory::Consent => write!(f, "consent"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

/// Unified error type for tracequeue.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Storage errors (20-29)
    #[error("durability failure: {0}")]
    Durability(String),

    #[error("batch {batch_id} not found")]
    BatchNotFound { batch_id: String },

    // Transport errors (30-39)
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("payload rejected{}: {reason}", status_suffix(.status))]
    Rejected { status: Option<u16>, reason: String },

    #[error("upload timed out after {seconds}s")]
    UploadTimeout { seconds: u64 },

    // Consent errors (40-49)
    #[error("consent violation: upload attempted while consent is {state}")]
    ConsentViolation { state: ConsentState },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Internal errors (90-99)
    #[error("internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Storage errors
    /// - 30-39: Transport errors
    /// - 40-49: Consent errors
    /// - 60-69: I/O errors
    /// - 90-99: Internal errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidConfig(_) => 11,
            Error::Durability(_) => 20,
            Error::BatchNotFound { .. } => 22,
            Error::Transport(_) => 30,
            Error::Rejected { .. } => 31,
            Error::UploadTimeout { .. } => 32,
            Error::ConsentViolation { .. } => 40,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::Internal(_) => 90,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidConfig(_) => ErrorCategory::Config,

            Error::Durability(_) | Error::BatchNotFound { .. } => ErrorCategory::Storage,

            Error::Transport(_) | Error::Rejected { .. } | Error::UploadTimeout { .. } => {
                ErrorCategory::Transport
            }

            Error::ConsentViolation { .. } => ErrorCategory::Consent,

            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,

            Error::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Returns whether retrying the same operation later may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) | Error::InvalidConfig(_) => true,

            // Disk may free up
            Error::Durability(_) => true,
            Error::BatchNotFound { .. } => false,

            Error::Transport(_) => true,
            Error::Rejected { .. } => false,
            Error::UploadTimeout { .. } => true,

            Error::ConsentViolation { .. } => false,

            Error::Io(_) => true,
            Error::Json(_) => false,

            Error::Internal(_) => false,
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::InvalidConfig(_) => "Invalid Configuration",
            Error::Durability(_) => "Durability Failure",
            Error::BatchNotFound { .. } => "Batch Not Found",
            Error::Transport(_) => "Transport Failure",
            Error::Rejected { .. } => "Payload Rejected",
            Error::UploadTimeout { .. } => "Upload Timeout",
            Error::ConsentViolation { .. } => "Consent Violation",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "Serialization Error",
            Error::Internal(_) => "Internal Error",
        }
    }

    /// Structured representation for JSON output.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "category": self.category(),
            "message": self.to_string(),
            "recoverable": self.is_recoverable(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_grouped() {
        assert_eq!(Error::Config("x".into()).code(), 10);
        assert_eq!(Error::Durability("disk full".into()).code(), 20);
        assert_eq!(Error::Transport("reset".into()).code(), 30);
        assert_eq!(
            Error::ConsentViolation {
                state: ConsentState::Pending
            }
            .code(),
            40
        );
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            Error::Rejected {
                status: Some(400),
                reason: "bad".into()
            }
            .category(),
            ErrorCategory::Transport
        );
        assert_eq!(
            Error::BatchNotFound {
                batch_id: "x".into()
            }
            .category(),
            ErrorCategory::Storage
        );
        assert_eq!(
            Error::Internal("lock poisoned".into()).category(),
            ErrorCategory::Internal
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(Error::from(io).category(), ErrorCategory::Io);
    }

    #[test]
    fn test_rejected_message_includes_status() {
        let err = Error::Rejected {
            status: Some(413),
            reason: "too large".into(),
        };
        assert_eq!(err.to_string(), "payload rejected (HTTP 413): too large");

        let local = Error::Rejected {
            status: None,
            reason: "too large".into(),
        };
        assert_eq!(local.to_string(), "payload rejected: too large");
    }

    #[test]
    fn test_recoverability() {
        assert!(Error::Transport("x".into()).is_recoverable());
        assert!(!Error::Rejected {
            status: Some(400),
            reason: "x".into()
        }
        .is_recoverable());
        assert!(!Error::ConsentViolation {
            state: ConsentState::NotGranted
        }
        .is_recoverable());
    }

    #[test]
    fn test_to_json_shape() {
        let json = Error::UploadTimeout { seconds: 30 }.to_json();
        assert_eq!(json["code"], 32);
        assert_eq!(json["category"], "transport");
        assert_eq!(json["recoverable"], true);
    }
}
