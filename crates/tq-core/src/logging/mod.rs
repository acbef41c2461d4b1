//! Structured logging for tracequeue.
//!
//! This is the diagnostic channel: every absorbed failure (dropped event,
//! failed upload, eviction) ends up here, gated by verbosity.
//!
//! Provides dual-mode logging:
//! - Human-readable console output for interactive use
//! - Machine-parseable JSONL for agents and log shippers
//!
//! # Usage
//!
//! ```ignore
//! use tq_core::logging::{init_logging, LogConfig, LogContext, Stage, event_names};
//!
//! let config = LogConfig::from_env(None, None);
//! init_logging(&config);
//!
//! let ctx = LogContext::new(generate_run_id(), get_host_id());
//! log_event!(ctx, INFO, event_names::RUN_STARTED, Stage::Init, "Pipeline started");
//! ```
//!
//! stdout is reserved for command payloads; all log output goes to stderr.

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Level, LogContext, LogEvent, Stage};
pub use layer::JsonlLayer;

use std::io::IsTerminal;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging subsystem.
///
/// `RUST_LOG` directives, when present, replace the level filter. Calling
/// this twice is harmless; the second call leaves the first subscriber in
/// place.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let result = match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(use_ansi);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init()
            }
        }
        LogFormat::Jsonl => tracing_subscriber::registry()
            .with(filter)
            .with(JsonlLayer::stderr())
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("logging already initialized");
    }
}

/// Initialize logging from the environment only.
pub fn init_default_logging() {
    init_logging(&LogConfig::from_env(None, None));
}

/// Generate a unique run ID for this invocation.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &uuid[..12])
}

/// Host identifier for log correlation.
///
/// Uses machine-id on Linux, else a hash of the hostname, else random.
pub fn get_host_id() -> String {
    if let Ok(id) = std::fs::read_to_string("/etc/machine-id") {
        let id = id.trim();
        if id.len() >= 8 && id.is_ascii() {
            return format!("host-{}", &id[..8]);
        }
    }

    if let Ok(hostname) = std::env::var("HOSTNAME") {
        let hash = hash_string(&hostname);
        return format!("host-{}", &hash[..8]);
    }

    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("host-{}", &uuid[..8])
}

fn hash_string(s: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Emit a structured event carrying the context's correlation ids.
///
/// Usage:
/// ```ignore
/// log_event!(ctx, INFO, event_names::UPLOAD_SUCCEEDED, Stage::Upload, "Uploaded batch",
///     event_count = 12u64, status = 202u64);
/// ```
#[macro_export]
macro_rules! log_event {
    (@emit $lvl:ident, $ctx:expr, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::$lvl!(
            event = $event,
            run_id = %$ctx.run_id,
            pipeline_id = ?$ctx.pipeline_id,
            host_id = %$ctx.host_id,
            stage = %$stage,
            $($key = $val,)*
            "{}",
            $msg
        )
    };
    ($ctx:expr, INFO, $($rest:tt)*) => {
        $crate::log_event!(@emit info, $ctx, $($rest)*)
    };
    ($ctx:expr, DEBUG, $($rest:tt)*) => {
        $crate::log_event!(@emit debug, $ctx, $($rest)*)
    };
    ($ctx:expr, WARN, $($rest:tt)*) => {
        $crate::log_event!(@emit warn, $ctx, $($rest)*)
    };
    ($ctx:expr, ERROR, $($rest:tt)*) => {
        $crate::log_event!(@emit error, $ctx, $($rest)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_run_id() {
        let id1 = generate_run_id();
        let id2 = generate_run_id();
        assert!(id1.starts_with("run-"));
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 16);
    }

    #[test]
    fn test_get_host_id() {
        let host_id = get_host_id();
        assert!(host_id.starts_with("host-"));
        assert!(host_id.len() >= 13);
    }

    #[test]
    fn test_log_event_macro_expands() {
        let ctx = LogContext::new("run-1", "host-1");
        log_event!(
            ctx,
            DEBUG,
            event_names::SCHEDULE_TICK,
            Stage::Schedule,
            "tick",
            pending = 3usize
        );
        log_event!(ctx, WARN, event_names::UPLOAD_RETRY, Stage::Upload, "retry");
    }
}
