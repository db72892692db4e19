//! Connector configuration
//!
//! Settings live in a small TOML file. The server address is re-read from it
//! on every reconnect attempt, so editing the file while the connector runs
//! takes effect on the next supervisory cycle.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Settings file name inside the config directory
pub const SETTINGS_FILE_NAME: &str = "settings.toml";

/// Top-level application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Controller address as `host:port`
    pub server_address: Option<String>,

    /// Whether microphone capture is enabled
    pub mic_enabled: bool,

    /// Where decoded clips are stored
    pub clip_dir: Option<PathBuf>,

    /// Loop cadences and timeouts
    pub timings: TunnelTimings,
}

impl AppConfig {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load settings, falling back to defaults when the file does not exist yet
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Write settings back, creating the parent directory if needed
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Default settings path for this user
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        project_dirs()
            .map(|dirs| dirs.config_dir().join(SETTINGS_FILE_NAME))
            .ok_or(ConfigError::NoSettingsDir)
    }

    /// Configured clip directory, or the per-user data directory
    pub fn clip_dir_or_default(&self) -> Result<PathBuf, ConfigError> {
        match &self.clip_dir {
            Some(dir) => Ok(dir.clone()),
            None => project_dirs()
                .map(|dirs| dirs.data_dir().join("clips"))
                .ok_or(ConfigError::NoSettingsDir),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "fay", "fay-connector")
}

/// Loop cadences and timeouts, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TunnelTimings {
    /// Silence after which the connection is considered dead
    pub liveness_timeout_ms: u64,
    /// Supervisory loop cadence
    pub supervisor_interval_ms: u64,
    /// Pause of the receive/send loops while disconnected
    pub retry_delay_ms: u64,
    /// Capture/send loop cadence
    pub capture_interval_ms: u64,
    /// Hold-off after the capture device returned no data
    pub device_busy_backoff_ms: u64,
    /// Pause between inbound frames when not accumulating a clip
    pub receive_pause_ms: u64,
    /// TCP connect timeout
    pub connect_timeout_ms: u64,
    /// A socket write stuck longer than this fails and drops the link
    pub write_timeout_ms: u64,
    /// How long a capture read waits for audio before giving up
    pub read_chunk_timeout_ms: u64,
    /// Delay between releasing the microphone and starting playback
    pub playback_settle_ms: u64,
}

impl Default for TunnelTimings {
    fn default() -> Self {
        Self {
            liveness_timeout_ms: 12_000,
            supervisor_interval_ms: 3_000,
            retry_delay_ms: 1_000,
            capture_interval_ms: 50,
            device_busy_backoff_ms: 10_000,
            receive_pause_ms: 300,
            connect_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            read_chunk_timeout_ms: 1_000,
            playback_settle_ms: 100,
        }
    }
}

impl TunnelTimings {
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn supervisor_interval(&self) -> Duration {
        Duration::from_millis(self.supervisor_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }

    pub fn device_busy_backoff(&self) -> Duration {
        Duration::from_millis(self.device_busy_backoff_ms)
    }

    pub fn receive_pause(&self) -> Duration {
        Duration::from_millis(self.receive_pause_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.read_chunk_timeout_ms)
    }

    pub fn playback_settle(&self) -> Duration {
        Duration::from_millis(self.playback_settle_ms)
    }
}

/// Controller address parsed from `host:port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    /// Parse `host:port`.
    ///
    /// Valid only if the string splits into exactly two non-empty parts on
    /// `:` and the second one is a port number.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidAddress(input.to_string());

        let mut parts = input.trim().split(':');
        let (Some(host), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };
        if host.is_empty() || port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Resolve to socket addresses
    pub fn resolve(&self) -> std::io::Result<Vec<SocketAddr>> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map(|addrs| addrs.collect())
    }
}

impl FromStr for ServerAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Where the connection manager gets the controller address from
pub trait AddressSource: Send + Sync {
    /// Current raw address string, if any is configured
    fn server_address(&self) -> Option<String>;
}

/// Fixed address, e.g. from the command line
#[derive(Debug, Clone)]
pub struct StaticAddress(pub Option<String>);

impl StaticAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(Some(address.into()))
    }

    pub fn unset() -> Self {
        Self(None)
    }
}

impl AddressSource for StaticAddress {
    fn server_address(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads the address from the settings file on every call
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AddressSource for SettingsFile {
    fn server_address(&self) -> Option<String> {
        match AppConfig::load(&self.path) {
            Ok(config) => config.server_address,
            Err(e) => {
                tracing::debug!("Settings unavailable at {}: {}", self.path.display(), e);
                None
            }
        }
    }
}
