//! Pipeline configuration types.
//!
//! Every field has a default so a partial `tracequeue.json` is valid; the
//! defaults are sized for a desktop or mobile host.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tq_common::ConsentState;

/// Application directory name under the XDG data/config roots.
pub const APP_NAME: &str = "tracequeue";

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub upload: UploadSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub consent: ConsentSettings,
}

fn default_schema_version() -> String {
    crate::CONFIG_SCHEMA_VERSION.to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            schema_version: default_schema_version(),
            storage: StorageSettings::default(),
            upload: UploadSettings::default(),
            scheduler: SchedulerSettings::default(),
            consent: ConsentSettings::default(),
        }
    }
}

/// On-disk batch storage limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Batch directory. Defaults to `<data_local_dir>/tracequeue/batches`.
    pub dir: Option<PathBuf>,

    /// Size threshold that rotates the open batch.
    pub max_batch_size_bytes: u64,

    /// Age threshold that rotates the open batch.
    pub max_batch_age_secs: u64,

    /// Closed batches older than this are evicted.
    pub max_retention_age_secs: u64,

    /// Total bytes allowed on disk across all batch files.
    pub storage_cap_bytes: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            dir: None,
            max_batch_size_bytes: 512 * 1024,
            max_batch_age_secs: 10,
            max_retention_age_secs: 18 * 3600,
            storage_cap_bytes: 128 * 1024 * 1024,
        }
    }
}

impl StorageSettings {
    /// Resolved batch directory.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(default_storage_dir)
    }

    pub fn max_batch_age(&self) -> Duration {
        Duration::from_secs(self.max_batch_age_secs)
    }

    pub fn max_retention_age(&self) -> Duration {
        Duration::from_secs(self.max_retention_age_secs)
    }
}

/// Default batch directory from the XDG data dir.
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("batches")
}

/// Intake endpoint and request shaping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Intake URL batches are POSTed to.
    pub endpoint: String,

    /// Per-attempt timeout.
    pub timeout_secs: u64,

    /// Distinct batches uploaded in parallel per tick.
    pub max_concurrent_uploads: usize,

    /// Framed request bodies above this size are rejected locally.
    pub max_payload_bytes: u64,

    pub content_type: String,

    /// Extra request headers (API keys, source tags).
    pub headers: BTreeMap<String, String>,

    pub format: PayloadFormatSettings,
}

impl Default for UploadSettings {
    fn default() -> Self {
        UploadSettings {
            endpoint: "http://127.0.0.1:8126/v1/input".to_string(),
            timeout_secs: 30,
            max_concurrent_uploads: 2,
            max_payload_bytes: 4 * 1024 * 1024,
            content_type: "application/json".to_string(),
            headers: BTreeMap::new(),
            format: PayloadFormatSettings::default(),
        }
    }
}

impl UploadSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How event payloads are joined into one request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadFormatSettings {
    pub prefix: String,
    pub separator: String,
    pub suffix: String,
}

impl Default for PayloadFormatSettings {
    fn default() -> Self {
        // JSON array of events
        PayloadFormatSettings {
            prefix: "[".to_string(),
            separator: ",".to_string(),
            suffix: "]".to_string(),
        }
    }
}

/// Upload scheduler cadence and gating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub tick_interval_secs: u64,

    /// Battery fraction (0..=1) under which uploads wait for charging.
    pub low_battery_threshold: f64,

    pub backoff: BackoffSettings,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            tick_interval_secs: 5,
            low_battery_threshold: 0.10,
            backoff: BackoffSettings::default(),
        }
    }
}

impl SchedulerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

/// Exponential backoff curve for retryable upload failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Random extra delay as a fraction of the computed delay, in [0, 1).
    pub jitter_ratio: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        BackoffSettings {
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 5 * 60 * 1_000,
            jitter_ratio: 0.2,
        }
    }
}

/// Consent used when no decision has been persisted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentSettings {
    pub initial: ConsentState,
}
