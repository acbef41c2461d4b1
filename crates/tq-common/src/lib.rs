//! tracequeue common types, IDs, and errors.
//!
//! This crate provides foundational types shared by the store and the
//! uploader:
//! - Batch identity ordered by creation time
//! - The process-wide consent state
//! - A unified error type with stable codes

pub mod consent;
pub mod error;
pub mod id;

pub use consent::ConsentState;
pub use error::{Error, ErrorCategory, Result};
pub use id::BatchId;

/// Schema version for persisted state (batch files, consent file).
pub const SCHEMA_VERSION: &str = "1.0.0";
