//! Configuration and sync-status models.
//!
//! Contains the typed configuration sections loaded from `config.toml`
//! and the status record kept by the cloud sync scheduler.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// HTTP/WebSocket listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the server binds to.
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

/// Configuration for the periodic cloud reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval between background sync runs in seconds.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Whether the background task runs at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Failed attempts after which a message is reported at warn level.
    #[serde(default = "default_warn_after_attempts")]
    pub warn_after_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            enabled: default_enabled(),
            warn_after_attempts: default_warn_after_attempts(),
        }
    }
}

impl SyncConfig {
    /// Background interval, never shorter than one second.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

const fn default_interval() -> u64 {
    30
}

const fn default_enabled() -> bool {
    true
}

const fn default_warn_after_attempts() -> u32 {
    20
}

/// Cloud sink and connectivity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Base URL of the remote message store. Cloud sync stays off when absent.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Optional bearer token sent with every request.
    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// `host:port` used to decide whether the internet is reachable.
    #[serde(default = "default_reachability_target")]
    pub reachability_target: String,

    #[serde(default = "default_reachability_timeout")]
    pub reachability_timeout_ms: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_token: None,
            request_timeout_secs: default_request_timeout(),
            reachability_target: default_reachability_target(),
            reachability_timeout_ms: default_reachability_timeout(),
        }
    }
}

const fn default_request_timeout() -> u64 {
    10
}

fn default_reachability_target() -> String {
    "1.1.1.1:443".to_string()
}

const fn default_reachability_timeout() -> u64 {
    1500
}

/// How a discovery scan sources its devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryMode {
    /// Only real probes.
    Real,
    /// Only manufactured devices.
    Simulated,
    /// Real probes, manufactured devices when they find nothing.
    #[default]
    RealWithFallback,
}

impl std::str::FromStr for DiscoveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "real" => Ok(Self::Real),
            "simulated" => Ok(Self::Simulated),
            "real-with-fallback" | "fallback" => Ok(Self::RealWithFallback),
            _ => Err(format!(
                "Unknown discovery mode: {s}. Use: real, simulated, real-with-fallback"
            )),
        }
    }
}

/// Device discovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub mode: DiscoveryMode,

    /// Upper bound for any single probe.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Number of manufactured devices when simulating.
    #[serde(default = "default_simulated_count")]
    pub simulated_count: usize,

    /// Reverse-resolve ARP entries to hostnames.
    #[serde(default = "default_enabled")]
    pub resolve_hostnames: bool,

    /// Concurrent pings during a subnet sweep.
    #[serde(default = "default_ping_concurrency")]
    pub ping_concurrency: usize,

    /// How long to collect SSDP responses.
    #[serde(default = "default_ssdp_window")]
    pub ssdp_window_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::default(),
            probe_timeout_secs: default_probe_timeout(),
            simulated_count: default_simulated_count(),
            resolve_hostnames: default_enabled(),
            ping_concurrency: default_ping_concurrency(),
            ssdp_window_ms: default_ssdp_window(),
        }
    }
}

const fn default_probe_timeout() -> u64 {
    8
}

const fn default_simulated_count() -> usize {
    4
}

const fn default_ping_concurrency() -> usize {
    64
}

const fn default_ssdp_window() -> u64 {
    2000
}

/// Typing indicator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingConfig {
    /// Inactivity window before a synthetic "stopped" is emitted.
    #[serde(default = "default_typing_timeout")]
    pub timeout_ms: u64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_typing_timeout(),
        }
    }
}

const fn default_typing_timeout() -> u64 {
    3000
}

/// Path configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathConfig {
    /// Base data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub cloud: CloudConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub typing: TypingConfig,

    #[serde(default)]
    pub paths: PathConfig,
}

impl AppConfig {
    /// Get the data directory, using default if not configured.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.paths
            .data_dir
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".localwave")
    }

    /// Get the message database path.
    #[must_use]
    pub fn storage_db_path(&self) -> PathBuf {
        self.data_dir().join("messages.db")
    }

    #[must_use]
    pub const fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing.timeout_ms)
    }
}

/// Progress of cloud reconciliation, as observed by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Last run that committed a batch.
    pub last_sync: Option<DateTime<Utc>>,

    /// Messages committed by the last successful batch.
    pub last_synced_count: usize,

    /// Messages committed since startup.
    pub total_synced: usize,

    /// Whether a to-cloud run is in flight.
    pub is_syncing: bool,

    /// Last failure, cleared by the next successful batch.
    pub last_error: Option<String>,

    /// To-cloud runs started since startup.
    pub runs: u64,
}

impl SyncStatus {
    /// Mark sync as in progress.
    #[must_use]
    pub const fn syncing(mut self) -> Self {
        self.is_syncing = true;
        self.runs += 1;
        self
    }

    /// Record a committed batch.
    #[must_use]
    pub fn completed(mut self, count: usize) -> Self {
        self.is_syncing = false;
        if count > 0 {
            self.last_sync = Some(Utc::now());
            self.last_synced_count = count;
            self.total_synced += count;
        }
        self.last_error = None;
        self
    }

    /// Set error state.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self.is_syncing = false;
        self
    }
}
