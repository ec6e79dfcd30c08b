//! Logger configuration
//!
//! Stored as JSON. A missing file means defaults, which match a Precisa
//! 321 LX out of the box (9600 baud, 7 data bits, odd parity, 1 stop bit).

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::checkpoint::DEFAULT_CHECKPOINT_FILE;
use crate::export::DEFAULT_EXPORT_FILE;
use crate::frame::DEFAULT_MAX_FRAME_BYTES;
use crate::transport::serial::BAUD_RATES;
use crate::transport::{TransportConfig, DEFAULT_POLL_MS};

/// Configuration file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Errors loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The file is not valid JSON for this schema
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// A setting is outside the supported range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Everything needed to run an acquisition session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Connection to the balance
    pub transport: TransportConfig,
    /// Crash-recovery checkpoint file
    pub checkpoint_path: PathBuf,
    /// CSV file exports are appended to
    pub export_path: PathBuf,
    /// Read poll timeout; also bounds how quickly a disconnect is noticed
    pub poll_interval_ms: u64,
    /// Cap on buffered bytes without a line delimiter
    pub max_frame_bytes: usize,
    /// Device label stamped on readings; falls back to the last known label
    pub device_label: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_FILE),
            export_path: PathBuf::from(DEFAULT_EXPORT_FILE),
            poll_interval_ms: DEFAULT_POLL_MS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            device_label: None,
        }
    }
}

impl LoggerConfig {
    /// Default config location (in the user config directory)
    pub fn default_path() -> io::Result<PathBuf> {
        let base = dirs::config_dir().or_else(dirs::home_dir).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "Could not find config directory")
        })?;
        Ok(base.join("BalanceLogger").join(CONFIG_FILE_NAME))
    }

    /// Load and validate a config file, falling back to defaults if it is absent
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, content).map_err(io_err)
    }

    /// Check transport parameters against what balances support
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.transport {
            TransportConfig::Serial(serial) => {
                if !BAUD_RATES.contains(&serial.baud_rate) {
                    return Err(ConfigError::Invalid(format!(
                        "baud rate {} not in {:?}",
                        serial.baud_rate, BAUD_RATES
                    )));
                }
                if !matches!(serial.data_bits, 7 | 8) {
                    return Err(ConfigError::Invalid(format!(
                        "data bits must be 7 or 8, got {}",
                        serial.data_bits
                    )));
                }
                if !matches!(serial.stop_bits, 1 | 2) {
                    return Err(ConfigError::Invalid(format!(
                        "stop bits must be 1 or 2, got {}",
                        serial.stop_bits
                    )));
                }
            }
            TransportConfig::Tcp(tcp) => {
                if tcp.host.trim().is_empty() {
                    return Err(ConfigError::Invalid("TCP host is empty".into()));
                }
                if tcp.port == 0 {
                    return Err(ConfigError::Invalid("TCP port must be non-zero".into()));
                }
            }
            TransportConfig::Demo(demo) => {
                if demo.interval_ms == 0 {
                    return Err(ConfigError::Invalid("demo interval must be non-zero".into()));
                }
            }
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll interval must be non-zero".into()));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid("max frame size must be non-zero".into()));
        }
        Ok(())
    }
}
