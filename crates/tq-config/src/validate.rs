//! Configuration validation errors and semantic validation.

use thiserror::Error;

use crate::pipeline::{BackoffSettings, PipelineConfig, SchedulerSettings, StorageSettings, UploadSettings};

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Upper bound for parallel uploads; more would saturate a device uplink.
const MAX_CONCURRENT_UPLOADS: usize = 16;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Semantic validation failed: {0}")]
    SemanticError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::SemanticError(_) => 63,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Validate a pipeline configuration semantically.
pub fn validate_pipeline(config: &PipelineConfig) -> ValidationResult<()> {
    if config.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: config.schema_version.clone(),
        });
    }

    validate_storage(&config.storage)?;
    validate_upload(&config.upload)?;
    validate_scheduler(&config.scheduler)?;

    if config.upload.max_payload_bytes < config.storage.max_batch_size_bytes {
        return Err(ValidationError::SemanticError(format!(
            "upload.max_payload_bytes ({}) must be >= storage.max_batch_size_bytes ({}), \
             otherwise every full batch is rejected locally",
            config.upload.max_payload_bytes, config.storage.max_batch_size_bytes
        )));
    }

    Ok(())
}

fn validate_storage(storage: &StorageSettings) -> ValidationResult<()> {
    if storage.max_batch_size_bytes == 0 {
        return Err(invalid("storage.max_batch_size_bytes", "Must be > 0"));
    }
    if storage.max_batch_age_secs == 0 {
        return Err(invalid("storage.max_batch_age_secs", "Must be > 0"));
    }
    if storage.max_retention_age_secs < storage.max_batch_age_secs {
        return Err(invalid(
            "storage.max_retention_age_secs",
            format!(
                "Must be >= max_batch_age_secs ({}), got {}",
                storage.max_batch_age_secs, storage.max_retention_age_secs
            ),
        ));
    }
    if storage.storage_cap_bytes < storage.max_batch_size_bytes {
        return Err(invalid(
            "storage.storage_cap_bytes",
            format!(
                "Must be >= max_batch_size_bytes ({}), got {}",
                storage.max_batch_size_bytes, storage.storage_cap_bytes
            ),
        ));
    }
    Ok(())
}

fn validate_upload(upload: &UploadSettings) -> ValidationResult<()> {
    if !(upload.endpoint.starts_with("http://") || upload.endpoint.starts_with("https://")) {
        return Err(invalid(
            "upload.endpoint",
            format!("Must be an http(s) URL, got '{}'", upload.endpoint),
        ));
    }
    if upload.timeout_secs == 0 {
        return Err(invalid("upload.timeout_secs", "Must be > 0"));
    }
    if upload.max_concurrent_uploads == 0 || upload.max_concurrent_uploads > MAX_CONCURRENT_UPLOADS {
        return Err(invalid(
            "upload.max_concurrent_uploads",
            format!(
                "Must be in [1, {}], got {}",
                MAX_CONCURRENT_UPLOADS, upload.max_concurrent_uploads
            ),
        ));
    }
    if upload.content_type.trim().is_empty() {
        return Err(invalid("upload.content_type", "Must not be empty"));
    }
    Ok(())
}

fn validate_scheduler(scheduler: &SchedulerSettings) -> ValidationResult<()> {
    if scheduler.tick_interval_secs == 0 {
        return Err(invalid("scheduler.tick_interval_secs", "Must be > 0"));
    }
    let threshold = scheduler.low_battery_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(invalid(
            "scheduler.low_battery_threshold",
            format!("Must be in (0, 1], got {}", threshold),
        ));
    }
    validate_backoff(&scheduler.backoff)
}

fn validate_backoff(backoff: &BackoffSettings) -> ValidationResult<()> {
    if backoff.initial_delay_ms == 0 {
        return Err(invalid("scheduler.backoff.initial_delay_ms", "Must be > 0"));
    }
    if backoff.max_delay_ms < backoff.initial_delay_ms {
        return Err(invalid(
            "scheduler.backoff.max_delay_ms",
            format!(
                "Must be >= initial_delay_ms ({}), got {}",
                backoff.initial_delay_ms, backoff.max_delay_ms
            ),
        ));
    }
    if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
        return Err(invalid(
            "scheduler.backoff.multiplier",
            format!("Must be finite and >= 1.0, got {}", backoff.multiplier),
        ));
    }
    if !(0.0..1.0).contains(&backoff.jitter_ratio) {
        return Err(invalid(
            "scheduler.backoff.jitter_ratio",
            format!("Must be in [0, 1), got {}", backoff.jitter_ratio),
        ));
    }
    // Successive delays must grow even when the earlier one drew maximal jitter
    if backoff.multiplier <= 1.0 + backoff.jitter_ratio {
        return Err(ValidationError::SemanticError(format!(
            "scheduler.backoff.multiplier ({}) must exceed 1 + jitter_ratio ({})",
            backoff.multiplier,
            1.0 + backoff.jitter_ratio
        )));
    }
    Ok(())
}
