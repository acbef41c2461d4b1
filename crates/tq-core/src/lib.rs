//! tracequeue core library.
//!
//! This library provides the delivery half of the pipeline:
//! - The uploader and its transport seam
//! - Platform conditions (network reachability, battery)
//! - The upload scheduler with per-batch backoff
//! - The `Pipeline` facade used by instrumentation
//! - Structured logging and CLI exit codes
//!
//! Persistence lives in `tq-store`; the binary entry point is in `main.rs`.

pub mod conditions;
pub mod exit_codes;
pub mod logging;
pub mod pipeline;
pub mod scheduler;
pub mod uploader;

pub use conditions::{BatteryState, ConditionsProvider, StaticConditions, SysfsConditions};
pub use pipeline::Pipeline;
pub use scheduler::{
    BackoffPolicy, RetryState, SchedulerPhase, SchedulerStats, TickReport, UploadScheduler,
};
pub use uploader::{FailureReason, Transport, UploadOutcome, Uploader};
#[cfg(feature = "http")]
pub use uploader::UreqTransport;
