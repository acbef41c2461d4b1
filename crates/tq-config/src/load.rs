//! Loading `tracequeue.json` with provenance.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::pipeline::PipelineConfig;
use crate::resolve::{resolve_config, ConfigSource};
use crate::validate::{validate_pipeline, ValidationError};

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid JSON in config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Semantic validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ConfigError::NotFound { .. } => 60,
            ConfigError::ParseError { .. } => 62,
            ConfigError::ValidationError(inner) => inner.code(),
            ConfigError::IoError { .. } => 64,
        }
    }
}

impl From<ConfigError> for tq_common::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ValidationError(inner) => tq_common::Error::InvalidConfig(inner.to_string()),
            other => tq_common::Error::Config(other.to_string()),
        }
    }
}

/// Configuration with provenance information.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub config: PipelineConfig,

    /// File the config was read from (None if using defaults).
    pub path: Option<PathBuf>,

    #[serde(serialize_with = "serialize_source")]
    pub source: ConfigSource,
}

fn serialize_source<S: serde::Serializer>(source: &ConfigSource, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(source)
}

/// Resolve, load and validate the configuration.
///
/// An explicit `cli_path` that does not exist is an error rather than a
/// silent fallback to defaults.
pub fn load_config(cli_path: Option<&Path>) -> Result<ResolvedConfig, ConfigError> {
    if let Some(path) = cli_path {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
    }

    let paths = resolve_config(cli_path);
    let config = match &paths.config {
        Some(path) => load_config_from_file(path)?,
        None => {
            let config = PipelineConfig::default();
            validate_pipeline(&config)?;
            config
        }
    };

    Ok(ResolvedConfig {
        config,
        path: paths.config,
        source: paths.source,
    })
}

/// Load and validate a config file at a known path.
pub fn load_config_from_file(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::IoError {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    let config: PipelineConfig =
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

    validate_pipeline(&config)?;
    Ok(config)
}
