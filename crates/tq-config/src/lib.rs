//! tracequeue configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for `tracequeue.json`
//! - Config resolution (CLI → env → XDG → system → defaults)
//! - Semantic validation of the operational tunables

pub mod load;
pub mod pipeline;
pub mod resolve;
pub mod validate;

pub use load::{load_config, load_config_from_file, ConfigError, ResolvedConfig};
pub use pipeline::{
    BackoffSettings, ConsentSettings, PayloadFormatSettings, PipelineConfig, SchedulerSettings,
    StorageSettings, UploadSettings,
};
pub use resolve::{resolve_config, ConfigPaths, ConfigSource};
pub use validate::{validate_pipeline, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

/// Standard config file name.
pub const CONFIG_FILENAME: &str = "tracequeue.json";
