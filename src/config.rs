//! Server configuration.
//!
//! Everything deployment-tunable lives here: bind address, the accepted
//! client version window, the required script version and the idle
//! timeout. Loaded from a JSON file when the binary is given `--config`;
//! every field falls back to its default when absent.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT, DEFAULT_PORT, DEFAULT_SCRIPT_VERSION, DEFAULT_VERSION_MAX,
    DEFAULT_VERSION_MIN,
};

/// Configuration for the relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host/interface to bind.
    pub host: String,
    /// TCP port to listen on.
    pub port: u16,
    /// Minimum accepted client version, major part.
    pub min_major: u8,
    /// Minimum accepted client version, minor part.
    pub min_minor: u8,
    /// Maximum accepted client version, major part.
    pub max_major: u8,
    /// Maximum accepted client version, minor part.
    pub max_minor: u8,
    /// Required script version (exact match).
    pub script_version: u8,
    /// Idle read timeout in seconds; a silent connection is dropped with
    /// reason "Ping timeout" once it elapses.
    pub idle_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            min_major: DEFAULT_VERSION_MIN.0,
            min_minor: DEFAULT_VERSION_MIN.1,
            max_major: DEFAULT_VERSION_MAX.0,
            max_minor: DEFAULT_VERSION_MAX.1,
            script_version: DEFAULT_SCRIPT_VERSION,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// Idle read timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 34403);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.idle_timeout(), Duration::from_secs(90));
        assert!((config.min_major, config.min_minor) <= (config.max_major, config.max_minor));
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"port": 1234, "script_version": 7}"#).unwrap();
        assert_eq!(config.port, 1234);
        assert_eq!(config.script_version, 7);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.idle_timeout_secs, 90);
    }

    #[test]
    fn test_round_trip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.port, config.port);
        assert_eq!(back.max_minor, config.max_minor);
    }
}
