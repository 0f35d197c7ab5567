use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use pulsewatch_logs::{DEFAULT_CAPACITY, DEFAULT_CAPTURE_CAPACITY};

/// Monitor configuration
///
/// Defaults live in code; an optional TOML file overrides them, and CLI
/// flags override individual fields on top.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Base URL for the snapshot endpoints
    pub base_url: String,

    /// WebSocket endpoint delivering the event stream
    pub stream_url: String,

    /// Capacity of the merged log view
    pub capacity: usize,

    /// Page size for snapshot fetches
    pub snapshot_limit: usize,

    /// Capture file location; defaults to ~/.pulsewatch/capture.json
    pub capture_path: Option<PathBuf>,

    /// Capacity of the local capture buffer
    pub capture_capacity: usize,

    /// Delay between reconnect attempts
    pub reconnect_delay_secs: u64,

    /// Grow the reconnect delay exponentially instead of keeping it fixed
    pub exponential_backoff: bool,

    /// Keep-alive ping cadence while connected
    pub keepalive_secs: u64,

    /// Start with the periodic snapshot refresh enabled
    pub auto_refresh: bool,

    /// Cadence of the periodic snapshot refresh
    pub auto_refresh_secs: u64,

    /// HTTP request timeout for snapshot fetches
    pub request_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4000/api".to_string(),
            stream_url: "ws://127.0.0.1:4000/api/logs/stream".to_string(),
            capacity: DEFAULT_CAPACITY,
            snapshot_limit: DEFAULT_CAPACITY,
            capture_path: None,
            capture_capacity: DEFAULT_CAPTURE_CAPACITY,
            reconnect_delay_secs: 5,
            exponential_backoff: false,
            keepalive_secs: 30,
            auto_refresh: false,
            auto_refresh_secs: 30,
            request_timeout_secs: 10,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn auto_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.auto_refresh_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.capacity, 100);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert!(!config.exponential_backoff);
        assert!(!config.auto_refresh);
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pulsewatch.toml");
        fs::write(
            &path,
            "base_url = \"http://logs.internal:9000\"\nexponential_backoff = true\n",
        )
        .unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.base_url, "http://logs.internal:9000");
        assert!(config.exponential_backoff);
        // Untouched fields keep their defaults
        assert_eq!(config.keepalive_secs, 30);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(MonitorConfig::load(Path::new("/no/such/pulsewatch.toml")).is_err());
    }
}
