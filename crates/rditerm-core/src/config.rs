//! Terminal configuration
//!
//! Serializable settings for the device session and the instrument driver,
//! stored as pretty-printed JSON.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::lock::DEFAULT_LOCK_DIR;
use crate::transport::OpenParams;

/// Default serial device
pub const DEFAULT_DEVICE: &str = "/dev/ttyS0";

/// Default baud rate for instrument communication
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default receive buffer retention in bytes
pub const DEFAULT_BUFFER_CAPACITY: usize = 16384;

/// Name of the configuration file inside the config directory
const CONFIG_FILE_NAME: &str = "rditerm.json";

/// Device session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial device path
    pub device: String,
    /// Initial baud rate
    pub baud_rate: u32,
    /// Application name passed to the transport on open
    pub app_name: String,
    /// Directory holding device lock markers
    pub lock_dir: PathBuf,
    /// Transport open timeout in milliseconds
    pub open_timeout_ms: u64,
    /// Read timeout granularity in milliseconds
    pub receive_timeout_ms: u64,
    /// Receive buffer retention ceiling in bytes
    pub buffer_capacity: usize,
    /// Prompt polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Maximum bytes requested per read
    pub read_chunk: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            app_name: "ladcp-terminal".to_string(),
            lock_dir: PathBuf::from(DEFAULT_LOCK_DIR),
            open_timeout_ms: 2000,
            receive_timeout_ms: 200,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            poll_interval_ms: 50,
            read_chunk: 2048,
        }
    }
}

impl SessionConfig {
    /// Configuration for a device at a baud rate, other settings default
    pub fn for_device(device: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            device: device.into(),
            baud_rate,
            ..Self::default()
        }
    }

    /// Prompt polling interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Transport parameters for opening at `baud_rate`
    pub fn open_params(&self, baud_rate: u32) -> OpenParams {
        OpenParams {
            baud_rate,
            app_name: self.app_name.clone(),
            open_timeout: Duration::from_millis(self.open_timeout_ms),
            receive_timeout: Duration::from_millis(self.receive_timeout_ms.max(1)),
        }
    }
}

/// Instrument driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Baud rate the instrument wakes up at
    pub default_baud: u32,
    /// Explicit download baud; `None` picks one from the instrument type
    pub download_baud: Option<u32>,
    /// Per-directive prompt timeout in milliseconds
    pub step_timeout_ms: u64,
    /// Setup command file sent by the `SendSetup` operation
    pub command_file: PathBuf,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            default_baud: DEFAULT_BAUD_RATE,
            download_baud: None,
            step_timeout_ms: 2000,
            command_file: PathBuf::from("ladcp.cmd"),
        }
    }
}

impl InstrumentConfig {
    /// Per-directive prompt timeout
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

/// Complete terminal configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Session settings
    pub session: SessionConfig,
    /// Instrument settings
    pub instrument: InstrumentConfig,
}

impl TerminalConfig {
    /// Per-user configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rditerm")
            .join(CONFIG_FILE_NAME)
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to parse {}: {}", path.display(), e),
            )
        })
    }

    /// Load configuration, falling back to defaults when the file is missing
    pub fn load_or_default(path: &Path) -> io::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Save configuration as pretty-printed JSON, creating parent directories
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = TerminalConfig::default();
        assert_eq!(config.session.device, "/dev/ttyS0");
        assert_eq!(config.session.baud_rate, 9600);
        assert_eq!(config.session.buffer_capacity, 16384);
        assert_eq!(config.session.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.instrument.step_timeout(), Duration::from_secs(2));
        assert_eq!(config.instrument.download_baud, None);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "session": { "device": "/dev/ttyUSB3" }, "instrument": { "download_baud": 57600 } }"#;
        let config: TerminalConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.session.device, "/dev/ttyUSB3");
        assert_eq!(config.session.baud_rate, 9600);
        assert_eq!(config.instrument.download_baud, Some(57600));
        assert_eq!(config.instrument.default_baud, 9600);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rditerm.json");

        let mut config = TerminalConfig::default();
        config.session = SessionConfig::for_device("/dev/ttyUSB1", 19200);
        config.save(&path).unwrap();

        let loaded = TerminalConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = TerminalConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, TerminalConfig::default());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        let err = TerminalConfig::load(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
