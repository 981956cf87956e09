//! Server configuration
//!
//! Values come from built-in defaults, optionally overlaid by a TOML file,
//! then by command-line flags and environment variables in `main`.

use crate::error::{OfficeError, Result};
use crate::session::SessionSettings;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hub configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub addr: SocketAddr,

    /// SQLite file for snapshots and preferences
    pub db_path: PathBuf,

    /// Per-session broadcast buffer; a subscriber that falls this far
    /// behind is dropped
    pub subscriber_buffer: usize,

    /// Max buffered out-of-order events per session
    pub reorder_window_events: usize,

    /// Max time a sequence gap may stay open, in milliseconds
    pub reorder_window_ms: u64,

    /// Persist a snapshot every N applied events
    pub snapshot_every: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ([127, 0, 0, 1], 8000).into(),
            db_path: default_db_path(),
            subscriber_buffer: 64,
            reorder_window_events: 32,
            reorder_window_ms: 2000,
            snapshot_every: 10,
        }
    }
}

/// `<data dir>/officeviz/officeviz.db`
pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("officeviz")
        .join("officeviz.db")
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string; missing keys keep their defaults
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: ServerConfig =
            toml::from_str(toml_str).map_err(|e| OfficeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the hub cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.subscriber_buffer == 0 {
            return Err(OfficeError::Config(
                "subscriber_buffer must be at least 1".to_string(),
            ));
        }
        if self.reorder_window_events == 0 {
            return Err(OfficeError::Config(
                "reorder_window_events must be at least 1".to_string(),
            ));
        }
        if self.snapshot_every == 0 {
            return Err(OfficeError::Config(
                "snapshot_every must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-session actor settings
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            reorder_window_events: self.reorder_window_events,
            reorder_window: Duration::from_millis(self.reorder_window_ms),
            snapshot_every: self.snapshot_every,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr.port(), 8000);
        assert!(config.db_path.ends_with("officeviz/officeviz.db"));
        assert_eq!(config.session_settings(), SessionSettings::default());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml(
            r#"
            addr = "0.0.0.0:9100"
            reorder_window_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.addr.port(), 9100);
        assert_eq!(config.reorder_window_ms, 500);
        assert_eq!(config.subscriber_buffer, 64);
        assert_eq!(
            config.session_settings().reorder_window,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ServerConfig::from_toml("snapshot_every = 0").is_err());
        assert!(ServerConfig::from_toml("subscriber_buffer = 0").is_err());
        assert!(ServerConfig::from_toml("addr = \"not an address\"").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("officeviz.toml");
        std::fs::write(&path, "db_path = \"/tmp/office.db\"\n").unwrap();
        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/office.db"));
    }
}
