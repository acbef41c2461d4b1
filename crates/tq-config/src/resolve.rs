//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG paths →
//! system config → built-in defaults.

use std::path::{Path, PathBuf};

use crate::pipeline::APP_NAME;
use crate::CONFIG_FILENAME;

/// Discovered configuration file path.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    /// Path to tracequeue.json (or None if not found).
    pub config: Option<PathBuf>,

    /// Where the config was found (for diagnostics).
    pub source: ConfigSource,
}

/// Where a configuration file was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Found in /etc/tracequeue/.
    SystemConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::SystemConfig => write!(f, "system config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Environment variable naming the config file directly.
pub const ENV_CONFIG_PATH: &str = "TRACEQUEUE_CONFIG";

/// Environment variable naming a directory containing tracequeue.json.
pub const ENV_CONFIG_DIR: &str = "TRACEQUEUE_CONFIG_DIR";

/// Resolve the configuration file path.
///
/// 1. Explicit CLI path (if it exists)
/// 2. `TRACEQUEUE_CONFIG`
/// 3. `TRACEQUEUE_CONFIG_DIR` + tracequeue.json
/// 4. XDG config directory (~/.config/tracequeue/)
/// 5. System config (/etc/tracequeue/)
/// 6. Built-in defaults (None)
pub fn resolve_config(cli_path: Option<&Path>) -> ConfigPaths {
    resolve_with(
        cli_path,
        std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from),
        std::env::var_os(ENV_CONFIG_DIR).map(PathBuf::from),
        xdg_config_dir(),
        system_config_dir(),
    )
}

fn resolve_with(
    cli_path: Option<&Path>,
    env_path: Option<PathBuf>,
    env_dir: Option<PathBuf>,
    xdg_dir: Option<PathBuf>,
    system_dir: PathBuf,
) -> ConfigPaths {
    let found = |path: PathBuf, source: ConfigSource| ConfigPaths {
        config: Some(path),
        source,
    };

    if let Some(path) = cli_path {
        if path.exists() {
            return found(path.to_path_buf(), ConfigSource::CliArgument);
        }
    }

    if let Some(path) = env_path {
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    if let Some(dir) = env_dir {
        let path = dir.join(CONFIG_FILENAME);
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    if let Some(dir) = xdg_dir {
        let path = dir.join(CONFIG_FILENAME);
        if path.exists() {
            return found(path, ConfigSource::XdgConfig);
        }
    }

    let system_path = system_dir.join(CONFIG_FILENAME);
    if system_path.exists() {
        return found(system_path, ConfigSource::SystemConfig);
    }

    ConfigPaths::default()
}

/// Get the XDG config directory for tracequeue.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Get the system config directory.
pub fn system_config_dir() -> PathBuf {
    PathBuf::from("/etc").join(APP_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path) -> PathBuf {
        let path = dir.join(CONFIG_FILENAME);
        std::fs::write(&path, "{}").unwrap();
        path
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(format!("{}", ConfigSource::CliArgument), "CLI argument");
        assert_eq!(
            format!("{}", ConfigSource::Environment),
            "environment variable"
        );
        assert_eq!(
            format!("{}", ConfigSource::BuiltinDefault),
            "builtin default"
        );
    }

    #[test]
    fn test_nothing_found_falls_back_to_defaults() {
        let empty = TempDir::new().unwrap();
        let paths = resolve_with(
            Some(&empty.path().join("missing.json")),
            None,
            None,
            Some(empty.path().to_path_buf()),
            empty.path().join("etc"),
        );
        assert!(paths.config.is_none());
        assert_eq!(paths.source, ConfigSource::BuiltinDefault);
    }

    #[test]
    fn test_cli_beats_environment() {
        let cli = TempDir::new().unwrap();
        let env = TempDir::new().unwrap();
        let cli_file = touch(cli.path());
        let env_file = touch(env.path());

        let paths = resolve_with(
            Some(&cli_file),
            Some(env_file),
            None,
            None,
            PathBuf::from("/nonexistent"),
        );
        assert_eq!(paths.config, Some(cli_file));
        assert_eq!(paths.source, ConfigSource::CliArgument);
    }

    #[test]
    fn test_env_dir_beats_xdg() {
        let env = TempDir::new().unwrap();
        let xdg = TempDir::new().unwrap();
        let env_file = touch(env.path());
        touch(xdg.path());

        let paths = resolve_with(
            None,
            None,
            Some(env.path().to_path_buf()),
            Some(xdg.path().to_path_buf()),
            PathBuf::from("/nonexistent"),
        );
        assert_eq!(paths.config, Some(env_file));
        assert_eq!(paths.source, ConfigSource::Environment);
    }

    #[test]
    fn test_system_config_used_last() {
        let system = TempDir::new().unwrap();
        let system_file = touch(system.path());

        let paths = resolve_with(None, None, None, None, system.path().to_path_buf());
        assert_eq!(paths.config, Some(system_file));
        assert_eq!(paths.source, ConfigSource::SystemConfig);
    }

    #[test]
    fn test_system_config_dir() {
        assert_eq!(system_config_dir(), PathBuf::from("/etc/tracequeue"));
    }
}
