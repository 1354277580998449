//! Configuration file management.
//!
//! Handles loading and rendering the TOML configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{AppConfig, AppError, Result};

/// Default configuration file content.
const DEFAULT_CONFIG: &str = r#"# localwave configuration
# Auto-generated - edit as needed

[server]
# Address for the HTTP and WebSocket listener
bind = "0.0.0.0:5000"

[sync]
# Seconds between background cloud syncs (default: 30)
interval_secs = 30

# Whether the background sync task runs
enabled = true

# Failed attempts after which a message is reported as stuck
warn_after_attempts = 20

[cloud]
# Base URL of the cloud message store; without it messages stay unsynced
# endpoint = "https://example.com/api"
# api_token = "secret"
request_timeout_secs = 10

# Host probed to decide whether the internet is reachable
reachability_target = "1.1.1.1:443"
reachability_timeout_ms = 1500

[discovery]
# real | simulated | real-with-fallback
mode = "real-with-fallback"
probe_timeout_secs = 8
simulated_count = 4
resolve_hostnames = true
ping_concurrency = 64
ssdp_window_ms = 2000

[typing]
# Inactivity before a typing indicator expires
timeout_ms = 3000

[paths]
# Custom data directory (optional, defaults to ~/.localwave)
# data_dir = "/custom/path"
"#;

/// Load configuration from file or fall back to defaults.
///
/// # Errors
/// Returns error if file exists but cannot be read or parsed.
pub fn load_config() -> Result<AppConfig> {
    let config_path = config_file_path();

    if config_path.exists() {
        load_config_from_file(&config_path)
    } else {
        Ok(AppConfig::default())
    }
}

/// Load configuration from a specific file.
///
/// # Errors
/// Returns error if file cannot be read or parsed.
pub fn load_config_from_file(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("Failed to read config file: {}", path.display()), e))?;

    toml::from_str(&content).map_err(|e| AppError::Config {
        message: format!("Failed to parse config file: {e}"),
    })
}

/// Effective configuration as TOML.
///
/// # Errors
/// Returns error if serialization fails.
pub fn render_config(config: &AppConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| AppError::Config {
        message: format!("Failed to serialize config: {e}"),
    })
}

/// Write the commented default file to `path` unless it already exists.
/// Returns whether a file was created.
///
/// # Errors
/// Returns error if file cannot be created.
pub fn write_default_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io("Failed to create config directory", e))?;
    }

    fs::write(path, DEFAULT_CONFIG)
        .map_err(|e| AppError::io("Failed to create default config", e))?;

    tracing::info!(path = %path.display(), "Created default configuration");
    Ok(true)
}

/// Get the path to the configuration file.
#[must_use]
pub fn config_file_path() -> PathBuf {
    AppConfig::default_data_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DiscoveryMode;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_parses() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.sync.interval_secs, 30);
        assert_eq!(config.server.bind, "0.0.0.0:5000");
        assert_eq!(config.discovery.mode, DiscoveryMode::RealWithFallback);
        assert!(config.cloud.endpoint.is_none());
        assert_eq!(config.typing.timeout_ms, 3000);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = toml::from_str("[discovery]\nmode = \"simulated\"\n").unwrap();
        assert_eq!(config.discovery.mode, DiscoveryMode::Simulated);
        assert_eq!(config.discovery.simulated_count, 4);
        assert_eq!(config.sync.interval_secs, 30);
    }

    #[test]
    fn test_render_and_load() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.cloud.endpoint = Some("https://cloud.example".into());

        fs::write(&config_path, render_config(&config).unwrap()).unwrap();
        let loaded = load_config_from_file(&config_path).unwrap();

        assert_eq!(loaded.sync.interval_secs, config.sync.interval_secs);
        assert_eq!(loaded.cloud.endpoint.as_deref(), Some("https://cloud.example"));
    }

    #[test]
    fn test_data_dir_does_not_move_config_file() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.paths.data_dir = Some(dir.path().to_path_buf());

        assert!(config.storage_db_path().starts_with(dir.path()));
        assert!(!config_file_path().starts_with(dir.path()));
        assert_eq!(config_file_path().file_name().unwrap(), "config.toml");
    }

    #[test]
    fn test_write_default_config_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert!(write_default_config(&path).unwrap());
        assert!(!write_default_config(&path).unwrap());
        assert!(load_config_from_file(&path).is_ok());
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[sync]\ninterval_secs = \"often\"\n").unwrap();

        assert!(matches!(
            load_config_from_file(&path),
            Err(AppError::Config { .. })
        ));
    }
}
