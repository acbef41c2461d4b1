//! Structured event definitions for logging.
//!
//! Events follow a consistent schema for machine-parseable JSONL output.
//! All events carry the run and host ids plus the pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Log levels for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Stages of the batching pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup and configuration.
    Init,
    /// Event intake and persistence.
    Append,
    /// Batch rotation.
    Rotate,
    /// Retention and capacity eviction.
    Evict,
    /// Consent transitions.
    Consent,
    /// Scheduler ticks and condition checks.
    Schedule,
    /// Upload attempts.
    Upload,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Append => "append",
            Stage::Rotate => "rotate",
            Stage::Evict => "evict",
            Stage::Consent => "consent",
            Stage::Schedule => "schedule",
            Stage::Upload => "upload",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    // Store and consent (emitted by tq-store)
    pub use tq_store::event_names::*;

    // Scheduler
    pub const SCHEDULE_TICK: &str = "schedule.tick";
    pub const SCHEDULE_WAITING: &str = "schedule.waiting_for_conditions";
    pub const SCHEDULE_STOPPED: &str = "schedule.stopped";

    // Upload
    pub const UPLOAD_STARTED: &str = "upload.started";
    pub const UPLOAD_SUCCEEDED: &str = "upload.succeeded";
    pub const UPLOAD_RETRY: &str = "upload.retry";
    pub const UPLOAD_REJECTED: &str = "upload.rejected";
    pub const UPLOAD_CANCELLED: &str = "upload.cancelled";

    // Config
    pub const CONFIG_LOADED: &str = "config.loaded";

    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// A structured log event for JSONL output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts: DateTime<Utc>,

    pub level: Level,

    /// Event name (e.g., "upload.succeeded").
    pub event: String,

    /// Unique ID for this process invocation.
    pub run_id: String,

    /// Pipeline instance, when more than one shares a host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,

    pub stage: Stage,

    pub host_id: String,

    pub message: String,

    /// Additional structured fields (stable keys).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, serde_json::Value>,

    /// Batch the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

impl LogEvent {
    pub fn new(
        level: Level,
        event: impl Into<String>,
        run_id: impl Into<String>,
        host_id: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> Self {
        LogEvent {
            ts: Utc::now(),
            level,
            event: event.into(),
            run_id: run_id.into(),
            pipeline_id: None,
            stage,
            host_id: host_id.into(),
            message: message.into(),
            fields: HashMap::new(),
            batch_id: None,
        }
    }

    pub fn with_pipeline_id(mut self, pipeline_id: impl Into<String>) -> Self {
        self.pipeline_id = Some(pipeline_id.into());
        self
    }

    /// Add a field to the event.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.into(), v);
        }
        self
    }

    pub fn with_batch(mut self, batch_id: impl ToString) -> Self {
        self.batch_id = Some(batch_id.to_string());
        self
    }

    /// Serialize to a single JSON line.
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"serialization_failed","event":"{}"}}"#,
                self.event
            )
        })
    }
}

/// Correlation ids shared by every event of one pipeline.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub run_id: String,
    pub pipeline_id: Option<String>,
    pub host_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
            pipeline_id: None,
            host_id: host_id.into(),
        }
    }

    pub fn with_pipeline_id(mut self, pipeline_id: impl Into<String>) -> Self {
        self.pipeline_id = Some(pipeline_id.into());
        self
    }

    /// Create an event with this context.
    pub fn event(
        &self,
        level: Level,
        event: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> LogEvent {
        let mut e = LogEvent::new(level, event, &self.run_id, &self.host_id, stage, message);
        e.pipeline_id.clone_from(&self.pipeline_id);
        e
    }

    pub fn info(
        &self,
        event: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> LogEvent {
        self.event(Level::Info, event, stage, message)
    }

    pub fn debug(
        &self,
        event: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> LogEvent {
        self.event(Level::Debug, event, stage, message)
    }

    pub fn warn(
        &self,
        event: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> LogEvent {
        self.event(Level::Warn, event, stage, message)
    }

    pub fn error(
        &self,
        event: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> LogEvent {
        self.event(Level::Error, event, stage, message)
    }
}
