//! No-mock configuration loading + resolution tests.
//!
//! Covers:
//! - Resolution order (CLI > TRACEQUEUE_CONFIG > TRACEQUEUE_CONFIG_DIR)
//! - Partial documents filled in from defaults
//! - Validation failures surfacing through `load_config`

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tempfile::TempDir;
use tq_common::ConsentState;
use tq_config::resolve::{ENV_CONFIG_DIR, ENV_CONFIG_PATH};
use tq_config::{load_config, ConfigError, ConfigSource, ValidationError, CONFIG_FILENAME};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

struct EnvGuard {
    keys: Vec<String>,
    saved: Vec<Option<String>>,
}

impl EnvGuard {
    fn new(keys: &[&str]) -> Self {
        let saved = keys.iter().map(|k| env::var(k).ok()).collect();
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            saved,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in self.keys.iter().zip(&self.saved) {
            match value {
                Some(val) => env::set_var(key, val),
                None => env::remove_var(key),
            }
        }
    }
}

fn with_env_lock<T>(f: impl FnOnce() -> T) -> T {
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .expect("env lock poisoned");
    let _env = EnvGuard::new(&[ENV_CONFIG_PATH, ENV_CONFIG_DIR]);
    f()
}

fn write_config(dir: &Path, body: &str) -> PathBuf {
    fs::create_dir_all(dir).expect("create config dir");
    let path = dir.join(CONFIG_FILENAME);
    fs::write(&path, body).expect("write config");
    path
}

#[test]
fn test_explicit_file_is_loaded_with_defaults_filled() {
    with_env_lock(|| {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            dir.path(),
            r#"{
                "schema_version": "1.0.0",
                "storage": { "max_batch_size_bytes": 2048, "storage_cap_bytes": 65536 },
                "upload": { "endpoint": "https://intake.example.com/v1/spans?dd-api-key=x" },
                "consent": { "initial": "granted" }
            }"#,
        );

        let resolved = load_config(Some(&path)).expect("load");
        assert_eq!(resolved.source, ConfigSource::CliArgument);
        assert_eq!(resolved.path.as_deref(), Some(path.as_path()));
        assert_eq!(resolved.config.storage.max_batch_size_bytes, 2048);
        assert_eq!(resolved.config.storage.max_batch_age_secs, 10);
        assert_eq!(resolved.config.consent.initial, ConsentState::Granted);
        assert_eq!(resolved.config.upload.max_concurrent_uploads, 2);
    });
}

#[test]
fn test_env_path_then_env_dir() {
    with_env_lock(|| {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let direct = write_config(a.path(), r#"{ "scheduler": { "tick_interval_secs": 7 } }"#);
        write_config(b.path(), r#"{ "scheduler": { "tick_interval_secs": 9 } }"#);

        env::set_var(ENV_CONFIG_PATH, &direct);
        env::set_var(ENV_CONFIG_DIR, b.path());
        let resolved = load_config(None).expect("load via env path");
        assert_eq!(resolved.source, ConfigSource::Environment);
        assert_eq!(resolved.config.scheduler.tick_interval_secs, 7);

        env::remove_var(ENV_CONFIG_PATH);
        let resolved = load_config(None).expect("load via env dir");
        assert_eq!(resolved.source, ConfigSource::Environment);
        assert_eq!(resolved.config.scheduler.tick_interval_secs, 9);
    });
}

#[test]
fn test_invalid_file_is_rejected() {
    with_env_lock(|| {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            dir.path(),
            r#"{ "scheduler": { "backoff": { "jitter_ratio": 1.5 } } }"#,
        );
        let err = load_config(Some(&path)).unwrap_err();
        match err {
            ConfigError::ValidationError(ValidationError::InvalidValue { field, .. }) => {
                assert_eq!(field, "scheduler.backoff.jitter_ratio");
            }
            other => panic!("unexpected error: {other}"),
        }
    });
}

#[test]
fn test_unsupported_schema_version_is_rejected() {
    with_env_lock(|| {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path(), r#"{ "schema_version": "2.0.0" }"#);
        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError(ValidationError::VersionMismatch { .. })
        ));
    });
}
